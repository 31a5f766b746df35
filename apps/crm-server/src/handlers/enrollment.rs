//! User enrollment handler

use tonic::{Request, Response, Status};

use crm_proto::{EnrolledUser, RegisterUsersRequest, RegisterUsersResponse, UserOutcome};

use super::{reject, STATUS_OK};
use crate::enroller::{self, EnrollOutcome, Enrollee};
use crate::error::CrmError;
use crate::metrics::RequestTimer;
use crate::server::CrmServer;

pub async fn register_users_in_company(
    server: &CrmServer,
    request: Request<RegisterUsersRequest>,
) -> Result<Response<RegisterUsersResponse>, Status> {
    let timer = RequestTimer::new("register_users_in_company");
    let deadline = server.deadline(&request);
    if let Err(err) = server.authorize(&request) {
        return Ok(failure(timer, &err));
    }

    let req = request.into_inner();
    let users = req
        .users
        .into_iter()
        .map(|u| Enrollee {
            email: u.email,
            phone: u.phone,
            role_id: u.role_id,
        })
        .collect();

    match enroller::enroll(server, &req.company_id, &req.db_name, users, &deadline).await {
        Ok(enrolled) => {
            timer.success();
            let users = enrolled
                .into_iter()
                .map(|e| EnrolledUser {
                    email: e.email,
                    phone: e.phone,
                    role_id: e.role_id,
                    password: e.password.map(|p| p.to_string()).unwrap_or_default(),
                    outcome: outcome(e.outcome) as i32,
                })
                .collect();
            Ok(Response::new(RegisterUsersResponse {
                users,
                message: "users enrolled".to_string(),
                status: STATUS_OK,
            }))
        }
        Err(err) => Ok(failure(timer, &err)),
    }
}

fn outcome(outcome: EnrollOutcome) -> UserOutcome {
    match outcome {
        EnrollOutcome::Created => UserOutcome::Created,
        EnrollOutcome::Linked => UserOutcome::Linked,
        EnrollOutcome::AlreadyEnrolled => UserOutcome::AlreadyEnrolled,
    }
}

fn failure(timer: RequestTimer, err: &CrmError) -> Response<RegisterUsersResponse> {
    let (status, message) = reject("register_users_in_company", timer, err);
    Response::new(RegisterUsersResponse {
        users: Vec::new(),
        message,
        status,
    })
}
