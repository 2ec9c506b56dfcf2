fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| format!("Bundled protoc unavailable: {e:?}"))?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .emit_rerun_if_changed(false)
        .compile(&["proto/lookup.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/lookup.proto");
    Ok(())
}
