use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let proto_dir = "./src/protos";
    let protos = ["./src/protos/tally.proto"];

    println!("cargo:rerun-if-changed={}", proto_dir);
    println!("cargo:rerun-if-changed=build.rs");

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &[proto_dir])?;

    Ok(())
}
