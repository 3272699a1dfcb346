//! Command-line argument parsing for ModemGuard

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub once: bool,
    pub validate: bool,
    pub help: bool,
    /// Push the audio profile to one modem and exit
    pub configure_audio: Option<String>,
    /// Set when an option is missing its value
    pub error: Option<String>,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_from(&args)
}

/// Parse an argv-style slice (first element is the program name)
pub fn parse_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--configure-audio" => match args.get(i + 1).filter(|v| !v.starts_with("--")) {
                Some(id) => {
                    i += 1;
                    result.configure_audio = Some(id.clone());
                }
                None => result.error = Some("--configure-audio requires a modem id".to_string()),
            },
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("ModemGuard - GSM gateway self-healing supervisor\n");
    println!("USAGE:");
    println!("    modemguard [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once                      Run a single health check, print it as JSON and exit");
    println!("    --validate                  Validate configuration and exit");
    println!("    --configure-audio <MODEM>   Apply the audio profile to one modem and exit");
    println!("    --help, -h                  Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    See .env.example for configuration variables");
}
