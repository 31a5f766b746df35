mod common;
mod handlers;
mod provisioning;
