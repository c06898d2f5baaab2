use super::{json_pretty, EXIT_SUCCESS};

pub fn run(json: bool) -> Result<u8, String> {
    let name = "dockyard";
    let version = env!("CARGO_PKG_VERSION");
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    if json {
        let payload = serde_json::json!({
            "name": name,
            "version": version,
            "os": os,
            "arch": arch,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{name} {version} ({os}/{arch})");
    }
    Ok(EXIT_SUCCESS)
}
