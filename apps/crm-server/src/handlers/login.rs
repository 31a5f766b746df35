//! Login handler

use tonic::{Request, Response, Status};
use zeroize::Zeroizing;

use crm_proto::{LoginRequest, LoginResponse};

use super::{attach_identity, reject, STATUS_OK};
use crate::error::CrmError;
use crate::login::{self, Credentials};
use crate::metrics::RequestTimer;
use crate::server::CrmServer;

pub async fn login_db(
    server: &CrmServer,
    request: Request<LoginRequest>,
) -> Result<Response<LoginResponse>, Status> {
    let timer = RequestTimer::new("login_db");
    let deadline = server.deadline(&request);
    if let Err(err) = server.authorize(&request) {
        return Ok(failure(timer, &err));
    }

    let req = request.into_inner();
    let credentials = Credentials {
        email: req.email,
        phone: req.phone,
        password: Zeroizing::new(req.password),
    };

    match login::login(server, credentials, &deadline).await {
        Ok(session) => {
            timer.success();
            let mut response = Response::new(LoginResponse {
                message: "login successful".to_string(),
                db_name: session.db_name.to_string(),
                user_company_id: session.tenant_user_id.to_string(),
                status: STATUS_OK,
            });
            attach_identity(&mut response, &session.db_name, &session.tenant_user_id);
            Ok(response)
        }
        Err(err) => Ok(failure(timer, &err)),
    }
}

fn failure(timer: RequestTimer, err: &CrmError) -> Response<LoginResponse> {
    let (status, message) = reject("login_db", timer, err);
    Response::new(LoginResponse {
        message,
        status,
        ..Default::default()
    })
}
