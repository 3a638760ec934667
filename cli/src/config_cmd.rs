use anyhow::Result;
use rfsh_core::BridgeConfig;

const HEADER: &str = "\
# rfsh configuration
#
# Commands received in command-response mode and the shell started in
# pass-through mode run with the privileges of the rfsh process.
";

pub fn print_config(config: &BridgeConfig) -> Result<()> {
    let body = config.to_toml_string()?;
    println!("{HEADER}\n{body}");
    Ok(())
}
