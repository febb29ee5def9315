use anyhow::Context;
use silverhaven::{
    BlockKind, Character, NoticeLevel, Session, Settings, TurnResult, logging, presets,
};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands:
  /preset N        start with preset character N
  /describe TEXT   generate a character from a description and start
  /save            save the adventure
  /list            list saved adventures
  /load ID         load a saved adventure
  /delete ID       delete a saved adventure
  /titles          suggest adventure titles
  /title TEXT      rename the adventure
  /retry ID        redraw an illustration with the image model
  /quit            save and leave
Anything else is played as an action.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    if let Err(e) = logging::init(settings.debug_mode) {
        eprintln!("Logging disabled: {e}");
    }
    log::info!("Starting Silverhaven with provider {}", settings.provider);

    let mut session = Session::from_settings(&settings);
    if !session.is_configured() {
        println!("No API key found. Set GEMINI_API_KEY or OPENAI_API_KEY to wake the Game Master.");
    }

    println!("Welcome to Silverhaven. Choose your hero:");
    for (index, preset) in presets().iter().enumerate() {
        println!("  {}. {} the {}: {}", index + 1, preset.name, preset.class, preset.description);
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        let outcome = match command {
            "/quit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/preset" => match argument.parse::<usize>().ok().and_then(|n| presets().get(n.wrapping_sub(1)).cloned()) {
                Some(preset) => start(&mut session, preset.to_character()).await,
                None => {
                    println!("Pick a preset between 1 and {}.", presets().len());
                    Ok(())
                }
            },
            "/describe" => {
                let character = session.generate_character(argument).await;
                start(&mut session, character).await
            }
            "/save" => session.save().await.map(|id| println!("Saved as {id}")),
            "/list" => session.list_adventures().await.map(|adventures| {
                for adventure in adventures {
                    println!("{}  {}  ({})", adventure.id, adventure.title, adventure.character.name);
                }
            }),
            "/load" => session.load(argument).await.map(|()| {
                for message in &session.game_state().history {
                    println!("{}", message.history_line());
                }
            }),
            "/delete" => session.delete_adventure(argument).await,
            "/titles" => session.suggest_titles().await.map(|response| {
                for title in response.titles {
                    println!("  {title}");
                }
            }),
            "/title" => {
                session.set_adventure_title(argument);
                Ok(())
            }
            "/retry" => session
                .retry_image(argument)
                .await
                .map(|reference| println!("Image: {}", reference.to_url())),
            _ => session.send_action(line).await.map(|turn| show_turn(&turn)),
        };

        if let Err(e) = outcome {
            println!("{e}");
        }
        session.apply_pending_images();
        show_images(&session);
        for notice in session.drain_notices() {
            match notice.level {
                NoticeLevel::Error => println!("[!] {}", notice.text),
                _ => println!("[*] {}", notice.text),
            }
        }
    }

    session.wait_for_images().await;
    session.end_session().await;
    for notice in session.drain_notices() {
        println!("[{}] {}", notice.level, notice.text);
    }
    log::info!("Session ended");
    Ok(())
}

async fn start(session: &mut Session, character: Character) -> silverhaven::error::Result<()> {
    println!("{character}");
    let turn = session.accept_character(character).await?;
    show_turn(&turn);
    Ok(())
}

fn show_turn(turn: &TurnResult) {
    for block in &turn.blocks {
        match block.kind {
            BlockKind::Narration => println!("{}", block.content),
            BlockKind::Dialogue => println!(
                "{}: {}",
                block.speaker.as_deref().unwrap_or(silverhaven::message::DEFAULT_SPEAKER),
                block.content
            ),
        }
    }
    if let Some(suggestions) = &turn.suggestions {
        for (index, suggestion) in suggestions.iter().enumerate() {
            println!("  ({}) {}", index + 1, suggestion);
        }
    }
}

// The latest AI message's illustration, once it has resolved.
fn show_images(session: &Session) {
    let Some(message) = session.game_state().history.last() else {
        return;
    };
    if let Some(url) = &message.image_url {
        if !message.has_inline_image() {
            println!("Image: {url}");
        } else {
            println!("Image ready (inline, {} bytes)", url.len());
        }
    } else if let Some(error) = &message.image_error {
        println!("Image failed: {error} (/retry {})", message.id);
    }
}
