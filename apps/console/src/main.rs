use anyhow::Result;
use clap::Parser;
use client_core::{resolve_list_of_speakers_id, AssemblyClient, RouteParams, RouteParamsSource, SpeakersPanel};
use tokio_stream::StreamExt;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    username: String,
    /// Show this list instead of the assembly-wide one.
    #[arg(long)]
    list_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let client = AssemblyClient::new(&args.server_url)?;
    let user_id = client.login(&args.username).await?;
    info!(user_id = user_id.0, "logged in");

    client.refresh_config().await?;
    client.connect_events().await?;

    let mut params = RouteParams::new();
    if let Some(id) = args.list_id {
        params.insert("id".to_string(), id.to_string());
    }

    // Prime the resolved list over REST so the first render has data; from
    // then on the event socket keeps the cache fresh.
    if let Some(id) = resolve_list_of_speakers_id(&params, client.config()) {
        client.prime_list(id).await?;
    }

    let route = RouteParamsSource::new();
    route.navigate(params);
    let panel = SpeakersPanel::new(
        client.cache().clone(),
        client.config().clone(),
        route.subscribe(),
    );

    let mut states = panel.states();
    while let Some(state) = states.next().await {
        if state.is_loading {
            println!("(waiting for a list of speakers...)");
            continue;
        }

        let title = state
            .list_of_speakers
            .as_ref()
            .map(|l| l.title.as_str())
            .unwrap_or("?");
        println!("== {title} ==");
        match state.waiting_speakers.as_deref() {
            Some([]) => println!("  nobody is waiting"),
            Some(queue) => {
                for (position, speaker) in queue.iter().enumerate() {
                    let name = speaker.username.as_deref().unwrap_or("unknown");
                    let marker = if speaker.marked { "*" } else { " " };
                    println!("{:>3}.{marker} {name}", position + 1);
                }
            }
            None => {}
        }
    }

    Ok(())
}
