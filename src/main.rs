use dispatch_runtime::DispatchCore;
use std::io::{self, BufRead, Write};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let core = DispatchCore::from_env()?;
    core.start();

    tracing::info!("dispatch core ready; reading chat turns from stdin as \"user_id: message\"");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some((user_id, message)) = line.split_once(':') else {
            println!("expected \"user_id: message\"");
            continue;
        };
        match core.chat(user_id.trim(), message.trim()).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => println!("error: {e}"),
        }
        stdout.flush()?;
    }

    core.stop().await;
    Ok(())
}
