#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use pmp_common::{Data, Purpose};
use pmpc::config::{Args as ConfigArgs, ClientConfig};
use pmpc::Node;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// CLI arguments: node configuration plus optional startup credentials.
#[derive(Parser, Debug)]
#[command(name = "pmpc")]
#[command(about = "PMP client node")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    /// Username to authenticate as at startup.
    #[arg(long, env = "PMPC_USERNAME")]
    username: Option<String>,
    /// Password for the startup login.
    #[arg(long, env = "PMPC_PASSWORD")]
    password: Option<String>,
    /// Register a new account instead of logging in.
    #[arg(long)]
    register: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config: ClientConfig = cli.config.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let listener = TcpListener::bind(config.listen).await?;
    info!("listening on {}", config.listen);

    let (node, mut mailbox) = Node::new(config)?;
    info!("node address {}", node.addr_hex());

    let (shutdown_tx, _) = watch::channel(());
    let runner = tokio::spawn(node.clone().run(listener, shutdown_tx.clone()));

    if let (Some(username), Some(password)) = (cli.username.as_deref(), cli.password.as_deref()) {
        if cli.register {
            match node.create_user(username, password).await? {
                Purpose::CreateUserDone => info!(%username, "account created"),
                verdict => anyhow::bail!("registration rejected: {verdict:?}"),
            }
        } else if node.login(username, password).await? {
            info!(%username, "logged in");
        } else {
            anyhow::bail!("login failed for {username}");
        }
    }

    loop {
        tokio::select! {
            inbound = mailbox.inbox.recv() => {
                let Some(msg) = inbound else { break };
                match &msg.content {
                    Data::Text(text) => {
                        println!("[{}] {}: {}", msg.chat_name, msg.sender, text);
                    }
                    other => info!(chat = %msg.chat_name, sender = %msg.sender,
                        "non-text message: {:?}", other),
                }
            }
            chat = mailbox.keys.recv() => {
                if let Some(chat) = chat {
                    info!(%chat, "chat key installed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    match runner.await {
        Ok(Ok(())) => warn!("node stopped"),
        Ok(Err(e)) => error!("node error: {e}"),
        Err(e) => error!("node task failed: {e}"),
    }

    Ok(())
}
