//! One function per subcommand. Each renders what it prints so tests can check it.

use crm_proto::{
    LoginRequest, RegisterCompanyRequest, RegisterUsersRequest, UserOutcome, UserToEnroll,
};
use tonic::Request;
use zeroize::Zeroizing;

use crate::client::{EnrollmentClient, LoginClient, ProvisioningClient};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const STATUS_OK: i32 = 200;

pub struct CompanyArgs {
    pub name: String,
    pub address: String,
    pub email: String,
    pub phone: String,
    pub password: Zeroizing<String>,
}

fn failed(status: i32, message: &str) -> Box<dyn std::error::Error> {
    format!("request failed ({status}): {message}").into()
}

pub async fn cmd_register_company(
    client: &mut impl ProvisioningClient,
    args: CompanyArgs,
) -> CliResult<String> {
    let response = client
        .register_company(Request::new(RegisterCompanyRequest {
            name: args.name,
            address: args.address,
            email: args.email,
            phone: args.phone,
            password: args.password.to_string(),
        }))
        .await?
        .into_inner();
    if response.status != STATUS_OK {
        return Err(failed(response.status, &response.message));
    }

    Ok(format!(
        "{}\n  database: {}\n  user:     {}",
        response.message, response.db_name, response.user_company_id
    ))
}

/// Parses `EMAIL,PHONE,ROLE_ID`; the phone may be left empty.
pub fn parse_user(value: &str) -> Result<UserToEnroll, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [email, phone, role_id] if !role_id.is_empty() => Ok(UserToEnroll {
            email: email.to_string(),
            phone: phone.to_string(),
            role_id: role_id.to_string(),
        }),
        _ => Err(format!("expected EMAIL,PHONE,ROLE_ID, got {value:?}")),
    }
}

pub async fn cmd_enroll(
    client: &mut impl EnrollmentClient,
    company_id: String,
    db_name: String,
    users: Vec<UserToEnroll>,
) -> CliResult<String> {
    let response = client
        .register_users_in_company(Request::new(RegisterUsersRequest {
            company_id,
            db_name,
            users,
        }))
        .await?
        .into_inner();
    if response.status != STATUS_OK {
        return Err(failed(response.status, &response.message));
    }

    let mut out = format!("{}:", response.message);
    for user in response.users {
        let who = if user.email.is_empty() { &user.phone } else { &user.email };
        let outcome = match UserOutcome::try_from(user.outcome) {
            Ok(UserOutcome::Created) => "created",
            Ok(UserOutcome::Linked) => "linked",
            Ok(UserOutcome::AlreadyEnrolled) => "already enrolled",
            _ => "unknown",
        };
        out.push_str(&format!("\n  {who} ({outcome})"));
        if !user.password.is_empty() {
            out.push_str(&format!(" temporary password: {}", user.password));
        }
    }
    Ok(out)
}

pub async fn cmd_login(
    client: &mut impl LoginClient,
    email: String,
    phone: String,
    password: Zeroizing<String>,
) -> CliResult<String> {
    let response = client
        .login_db(Request::new(LoginRequest {
            email,
            phone,
            password: password.to_string(),
        }))
        .await?
        .into_inner();
    if response.status != STATUS_OK {
        return Err(failed(response.status, &response.message));
    }

    Ok(format!(
        "{}\n  database: {}\n  user:     {}",
        response.message, response.db_name, response.user_company_id
    ))
}
