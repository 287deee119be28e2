//! Compiles the cluster service protobuf definition with tonic-build,
//! generating both the server trait and the peer client.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/keymesh/v1/cluster.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/keymesh/v1/cluster.proto");
    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
