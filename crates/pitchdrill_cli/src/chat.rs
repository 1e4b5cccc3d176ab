use anyhow::{Context, Result};
use pitchdrill_core::{PersonaCatalog, PitchDrillConfig};
use pitchdrill_memory::SqliteAnalysisStore;
use pitchdrill_reasoning::{
    build_transport, CallCoach, PersonaSession, SessionOptions, TurnInput, DEFAULT_COACH_MODEL,
};
use pitchdrill_voice::{AudioFormat, OpenAiSpeech, OpenAiWhisper};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands: /analysis  /level  /save  /coach  /audio <file>  /quit";

pub async fn run(
    config: &PitchDrillConfig,
    catalog: &PersonaCatalog,
    persona_id: &str,
    save_on_exit: bool,
    coach_on_exit: bool,
) -> Result<()> {
    let profile = catalog.get(persona_id).cloned().with_context(|| {
        format!(
            "Unknown persona '{}'. Available: {}",
            persona_id,
            catalog.ids().join(", ")
        )
    })?;

    let realtime = config.llm.provider == "realtime";
    let mut options = SessionOptions::from(&config.llm);
    options.audio_replies = config.voice.enabled && realtime;

    let transport = build_transport(&config.llm)?;
    let mut session = PersonaSession::new(profile, transport, options);
    if config.voice.enabled {
        let stt = OpenAiWhisper::new(&config.voice.stt_model)?;
        session = session.with_speech_to_text(Arc::new(stt));
        // The realtime service speaks on its own.
        if !realtime {
            let tts = OpenAiSpeech::new(&config.voice.tts_model)?;
            session = session.with_text_to_speech(Arc::new(tts));
        }
    }
    session
        .start()
        .await
        .context("Failed to start the conversation")?;

    let name = session.profile().name.clone();
    println!(
        "You are on a call with {} ({} persona). {}",
        name,
        session.profile().difficulty.label(),
        HELP
    );

    let mut store: Option<SqliteAnalysisStore> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, arg) = input
            .split_once(' ')
            .map_or((input, ""), |(c, rest)| (c, rest.trim()));
        let turn = match (command, arg) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => {
                println!("{}", HELP);
                continue;
            }
            ("/level", _) => {
                println!(
                    "{} level: {}/10",
                    session.profile().affect.label(),
                    session.level()
                );
                continue;
            }
            ("/analysis", _) => {
                println!(
                    "\n{}\n\n{}\n",
                    session.generate_analysis(),
                    session.generate_recommendation()
                );
                continue;
            }
            ("/save", _) => {
                save(&session, &mut store, config).await;
                continue;
            }
            ("/coach", _) => {
                coach(config, &session.history().transcript()).await;
                continue;
            }
            ("/audio", path) => match read_audio(path).await {
                Ok(turn) => turn,
                Err(e) => {
                    println!("[Audio Error]: {:#}", e);
                    continue;
                }
            },
            _ => TurnInput::Text(input.to_string()),
        };

        // Ctrl-C while waiting aborts this turn only.
        let token = session.cancel_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        let reply = session.respond(turn).await;
        watcher.abort();
        // A Ctrl-C that lands after the reply must not poison the next turn.
        session.clear_cancel();

        match reply {
            Ok(reply) => println!("\n{}: {}\n", name, reply),
            Err(e) => {
                tracing::error!("Turn rejected: {}", e);
                break;
            }
        }
    }

    if save_on_exit && !session.history().is_empty() {
        save(&session, &mut store, config).await;
    }
    if coach_on_exit && !session.history().is_empty() {
        coach(config, &session.history().transcript()).await;
    }
    session.close().await;
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

async fn read_audio(path: &str) -> Result<TurnInput> {
    if path.is_empty() {
        anyhow::bail!("usage: /audio <file.wav>");
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let format = AudioFormat::from_path(path).unwrap_or(AudioFormat::Wav);
    Ok(TurnInput::Audio { bytes, format })
}

async fn save(
    session: &PersonaSession,
    store: &mut Option<SqliteAnalysisStore>,
    config: &PitchDrillConfig,
) {
    if store.is_none() {
        match SqliteAnalysisStore::new(&config.storage.db_path).await {
            Ok(s) => *store = Some(s),
            Err(e) => {
                println!("[Storage Error]: {:#}", e);
                return;
            }
        }
    }
    let Some(store) = store.as_ref() else { return };
    match session.save_analysis(store).await {
        Ok(record) => println!("Analysis saved as {}", record.key()),
        Err(e) => println!("[Storage Error]: {}", e),
    }
}

async fn coach(config: &PitchDrillConfig, transcript: &str) {
    // The coach is a one-shot completion, never a realtime session.
    let mut llm = config.llm.clone();
    let model = if llm.provider == "mock" {
        llm.model.clone()
    } else {
        DEFAULT_COACH_MODEL.to_string()
    };
    if llm.provider == "realtime" {
        llm.provider = "openai".to_string();
        llm.base_url = None;
    }

    let transport = match build_transport(&llm) {
        Ok(t) => t,
        Err(e) => {
            println!("[Coach Error]: {:#}", e);
            return;
        }
    };
    println!("Reviewing the call...");
    match CallCoach::new(transport, model).review(transcript).await {
        Ok(report) => {
            println!("\n{}\n", report.analysis);
            if !report.education_plan.is_empty() {
                println!("{}\n", report.education_plan);
            }
        }
        Err(e) => {
            tracing::warn!("Call review failed: {}", e);
            println!("Error occurred while analyzing the call. Please try again.");
        }
    }
}
