//! Generated gRPC types and services of the `crm` package.

tonic::include_proto!("crm");
