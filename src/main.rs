use anyhow::Result;
use comicforge::agent::AgentController;
use comicforge::config::Config;
use comicforge::server;
use inquire::Text;

fn print_usage() {
    println!("Usage: comicforge [COMMAND]");
    println!();
    println!("Commands:");
    println!("  serve          Run the HTTP API (chat + image hosting)");
    println!("  chat <prompt>  Run a single conversational turn and exit");
    println!("  (no command)   Interactive chat session; type 'exit' to quit");
    println!();
    println!("Options:");
    println!("  -h, --help     Show this help");
    println!("  -V, --version  Show the version");
}

async fn run_turn(agent: &mut AgentController, prompt: &str) -> Result<()> {
    let outcome = agent.handle_turn(prompt).await?;
    println!("{}", outcome.reply);
    for url in &outcome.panel_urls {
        println!("panel: {}", url);
    }
    for url in &outcome.page_urls {
        println!("page: {}", url);
    }
    Ok(())
}

async fn interactive(config: Config) -> Result<()> {
    let mut agent = AgentController::new(config)?;
    println!("Comic assistant ready. Type 'exit' to quit.");
    loop {
        let line = match Text::new("You:").prompt() {
            Ok(line) => line,
            Err(inquire::InquireError::OperationCanceled)
            | Err(inquire::InquireError::OperationInterrupted) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            break;
        }
        if let Err(e) = run_turn(&mut agent, &line).await {
            eprintln!("Error: {:#}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("-h") | Some("--help") => {
            print_usage();
            return Ok(());
        }
        Some("-V") | Some("--version") => {
            println!("comicforge {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("Set TEXT_MODEL_API_KEY and IMAGE_API_KEY before running.");
            std::process::exit(1);
        }
    };

    match args.first().map(String::as_str) {
        None => interactive(config).await,
        Some("serve") => server::run(config).await,
        Some("chat") => {
            let prompt = args[1..].join(" ");
            if prompt.trim().is_empty() {
                eprintln!("Usage: comicforge chat <prompt>");
                std::process::exit(1);
            }
            let mut agent = AgentController::new(config)?;
            run_turn(&mut agent, &prompt).await
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}
