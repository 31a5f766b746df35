fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/crm.proto");
    tonic_prost_build::configure().compile_protos(&["proto/crm.proto"], &["proto"])?;
    Ok(())
}
