use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::{
    AgendaItemId, ListOfSpeakersId, SpeakerState, UserId, GLOBAL_LIST_OF_SPEAKERS_KEY,
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/assembly.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    CreateAgendaItem {
        title: String,
    },
    DeleteAgendaItem {
        agenda_item_id: i64,
    },
    AddSpeaker {
        list_id: i64,
        user_id: i64,
    },
    ShowList {
        list_id: i64,
    },
    SetConfig {
        key: String,
        value: String,
    },
    /// Point the assembly-wide list of speakers at the given list.
    SetGlobalList {
        list_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => {
            let user_id = storage.create_user(&username).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::CreateAgendaItem { title } => {
            let (agenda_item_id, list_id) = storage.create_agenda_item(&title).await?;
            println!(
                "created agenda_item_id={} list_of_speakers_id={}",
                agenda_item_id.0, list_id.0
            );
        }
        Command::DeleteAgendaItem { agenda_item_id } => {
            match storage.delete_agenda_item(AgendaItemId(agenda_item_id)).await? {
                Some(list_id) => println!("deleted agenda item and list_of_speakers_id={}", list_id.0),
                None => println!("agenda item {agenda_item_id} not found"),
            }
        }
        Command::AddSpeaker { list_id, user_id } => {
            let speaker_id = storage
                .add_speaker(ListOfSpeakersId(list_id), UserId(user_id))
                .await?;
            println!("created speaker_id={}", speaker_id.0);
        }
        Command::ShowList { list_id } => {
            let list_id = ListOfSpeakersId(list_id);
            let Some(list) = storage.load_list_of_speakers(list_id).await? else {
                println!("list {} not found", list_id.0);
                return Ok(());
            };
            println!(
                "{} (closed: {})",
                list.title,
                if list.closed { "yes" } else { "no" }
            );
            let mut speakers = storage.list_speakers(list_id).await?;
            speakers.sort_by_key(|s| s.weight);
            for speaker in speakers {
                let state = SpeakerState::from_times(speaker.begin_time, speaker.end_time);
                println!(
                    "  [{:?}] weight={} {}",
                    state, speaker.weight, speaker.username
                );
            }
        }
        Command::SetConfig { key, value } => {
            storage.config_set(&key, &value).await?;
            println!("set {key}={value}");
        }
        Command::SetGlobalList { list_id } => {
            storage
                .config_set(GLOBAL_LIST_OF_SPEAKERS_KEY, &list_id.to_string())
                .await?;
            println!("set {GLOBAL_LIST_OF_SPEAKERS_KEY}={list_id}");
        }
    }

    Ok(())
}
