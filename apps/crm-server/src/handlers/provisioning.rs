//! Company registration handler

use tonic::{Request, Response, Status};
use zeroize::Zeroizing;

use crm_proto::{RegisterCompanyRequest, RegisterCompanyResponse};

use super::{attach_identity, reject, STATUS_OK};
use crate::metrics::RequestTimer;
use crate::provisioner::{self, RegistrationIntent};
use crate::server::CrmServer;

pub async fn register_company(
    server: &CrmServer,
    request: Request<RegisterCompanyRequest>,
) -> Result<Response<RegisterCompanyResponse>, Status> {
    let timer = RequestTimer::new("register_company");
    let deadline = server.deadline(&request);
    if let Err(err) = server.authorize(&request) {
        return Ok(failure(timer, &err));
    }

    let req = request.into_inner();
    let intent = RegistrationIntent {
        company_name: req.name,
        address: req.address,
        email: req.email,
        phone: req.phone,
        password: Zeroizing::new(req.password),
    };

    match provisioner::register(server, intent, &deadline).await {
        Ok(registration) => {
            timer.success();
            let message = if registration.replayed {
                "company already registered"
            } else {
                "company registered"
            };
            let mut response = Response::new(RegisterCompanyResponse {
                message: message.to_string(),
                db_name: registration.db_name.to_string(),
                user_company_id: registration.tenant_user_id.to_string(),
                status: STATUS_OK,
            });
            attach_identity(
                &mut response,
                &registration.db_name,
                &registration.tenant_user_id,
            );
            Ok(response)
        }
        Err(err) => Ok(failure(timer, &err)),
    }
}

fn failure(timer: RequestTimer, err: &crate::error::CrmError) -> Response<RegisterCompanyResponse> {
    let (status, message) = reject("register_company", timer, err);
    Response::new(RegisterCompanyResponse {
        message,
        status,
        ..Default::default()
    })
}
