mod script;
mod settings;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio::time::timeout;

use quill_stream::{
    AnswerSource, CharacterStreamer, FinalAnswer, SessionError, StreamerHooks,
};
use script::{EventKind, ScriptError, ScriptEvent};
use settings::ReplaySettings;

/// How long a scenario may wait for its next observation before failing.
const OBSERVATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Quiet period used to assert that an observation never arrives.
const QUIET_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    script_path: Option<PathBuf>,
    settings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    HappyPath,
    ErrorInterrupt,
    Literal,
    Script,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "happy_path" => Some(Self::HappyPath),
            "error_interrupt" => Some(Self::ErrorInterrupt),
            "literal" => Some(Self::Literal),
            "script" => Some(Self::Script),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::HappyPath => "happy_path",
            Self::ErrorInterrupt => "error_interrupt",
            Self::Literal => "literal",
            Self::Script => "script",
            Self::All => "all",
        }
    }

    fn built_in() -> [Self; 3] {
        [Self::HappyPath, Self::ErrorInterrupt, Self::Literal]
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { raw: String },
    #[snafu(display("scenario 'script' requires a script path argument"))]
    MissingScriptPath,
    #[snafu(display("failed to load replay script: {source}"))]
    Script { source: ScriptError },
    #[snafu(display("scenario '{scenario}' timed out waiting for: {expectation}"))]
    ObservationTimeout {
        scenario: &'static str,
        expectation: &'static str,
    },
    #[snafu(display("scenario '{scenario}' failed: {details}"))]
    Expectation {
        scenario: &'static str,
        details: String,
    },
}

/// One observation forwarded out of the streamer hooks.
#[derive(Debug)]
enum Observed {
    Output(String),
    StreamingComplete,
    Final(FinalAnswer),
    Error(SessionError),
}

fn usage() -> ! {
    eprintln!(
        "usage: quill <happy_path|error_interrupt|literal|all> [--settings <path>]\n       quill script <path> [--settings <path>]"
    );
    std::process::exit(2);
}

fn parse_args() -> RunnerArgs {
    let mut args = env::args().skip(1);
    let Some(raw_scenario) = args.next() else {
        usage();
    };
    let Some(scenario) = Scenario::parse(&raw_scenario) else {
        eprintln!("unknown scenario '{raw_scenario}'");
        usage();
    };

    let mut script_path = None;
    let mut settings_path = None;
    if scenario == Scenario::Script {
        script_path = args.next().map(PathBuf::from);
        if script_path.is_none() {
            usage();
        }
    }
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--settings" => settings_path = args.next().map(PathBuf::from),
            _ => usage(),
        }
    }

    RunnerArgs {
        scenario,
        script_path,
        settings_path,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = parse_args();
    let settings = ReplaySettings::load(args.settings_path.as_deref());
    tracing::info!(
        typing_speed_ms = settings.typing_speed_ms,
        event_gap_ms = settings.event_gap_ms,
        "replay settings loaded"
    );

    let scenarios: Vec<Scenario> = match args.scenario {
        Scenario::All => Scenario::built_in().to_vec(),
        scenario => vec![scenario],
    };

    let mut failures = 0usize;
    for scenario in scenarios {
        let result = run_scenario(scenario, &args, &settings).await;
        match result {
            Ok(()) => println!("PASS {}", scenario.name()),
            Err(error) => {
                println!("FAIL {}: {error}", scenario.name());
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}

async fn run_scenario(
    scenario: Scenario,
    args: &RunnerArgs,
    settings: &ReplaySettings,
) -> Result<(), RunnerError> {
    match scenario {
        Scenario::HappyPath => run_happy_path(settings).await,
        Scenario::ErrorInterrupt => run_error_interrupt(settings).await,
        Scenario::Literal => run_literal(settings).await,
        Scenario::Script => run_script(args, settings).await,
        Scenario::All => unreachable!("expanded by the caller"),
    }
}

fn forwarding_hooks(observed: mpsc::UnboundedSender<Observed>) -> StreamerHooks {
    let output_tx = observed.clone();
    let complete_tx = observed.clone();
    let final_tx = observed.clone();
    StreamerHooks::new()
        .on_output(move |text| {
            let _ = output_tx.send(Observed::Output(text.to_string()));
        })
        .on_streaming_complete(move || {
            let _ = complete_tx.send(Observed::StreamingComplete);
        })
        .on_final_answer(move |answer| {
            let _ = final_tx.send(Observed::Final(answer));
        })
        .on_error(move |error| {
            let _ = observed.send(Observed::Error(error));
        })
}

async fn next_observation(
    rx: &mut mpsc::UnboundedReceiver<Observed>,
    scenario: &'static str,
    expectation: &'static str,
) -> Result<Observed, RunnerError> {
    match timeout(OBSERVATION_TIMEOUT, rx.recv()).await {
        Ok(Some(observed)) => Ok(observed),
        Ok(None) | Err(_) => ObservationTimeoutSnafu {
            scenario,
            expectation,
        }
        .fail(),
    }
}

/// Asserts that no final answer lands within the quiet period.
async fn expect_no_final_answer(
    rx: &mut mpsc::UnboundedReceiver<Observed>,
    scenario: &'static str,
) -> Result<(), RunnerError> {
    let deadline = tokio::time::Instant::now() + QUIET_PERIOD;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(Observed::Final(answer))) => {
                return ExpectationSnafu {
                    scenario,
                    details: format!("unexpected final answer: {:?}", answer.answer),
                }
                .fail();
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return Ok(()),
        }
    }
}

const HAPPY_PATH_METADATA: &str = r#"{
    "data_points": ["docs/quarterly.pdf| Net revenue grew 12%."],
    "work_citation_lookup": {
        "File0": {"citation": "quarterly.pdf", "source_path": "docs/quarterly.pdf", "page_number": "2"}
    },
    "thought_chain": {"work_query": "revenue growth"}
}"#;

async fn run_happy_path(settings: &ReplaySettings) -> Result<(), RunnerError> {
    let events = vec![
        script_event(EventKind::Startup, HAPPY_PATH_METADATA),
        script_event(EventKind::Message, "Net revenue grew 12% [File0]."),
        script_event(EventKind::Message, "<br>See the citation for detail."),
        script_event(EventKind::End, ""),
    ];
    let (stream, worker) = script::scripted_transport(events, settings.event_gap());
    tokio::spawn(worker);

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    let handle = CharacterStreamer::spawn(
        AnswerSource::Transport(stream),
        forwarding_hooks(observed_tx),
        settings.streamer_config(),
    );

    let mut streaming_completed = false;
    let answer = loop {
        match next_observation(&mut observed_rx, "happy_path", "final answer").await? {
            Observed::Final(answer) => break answer,
            Observed::StreamingComplete => streaming_completed = true,
            Observed::Output(_) => continue,
            Observed::Error(error) => {
                return ExpectationSnafu {
                    scenario: "happy_path",
                    details: format!("unexpected error: {error}"),
                }
                .fail();
            }
        }
    };
    handle.shutdown().await;

    let expected = "Net revenue grew 12% [File0].\nSee the citation for detail.";
    if answer.answer != expected {
        return ExpectationSnafu {
            scenario: "happy_path",
            details: format!("answer mismatch: {:?}", answer.answer),
        }
        .fail();
    }
    if !streaming_completed {
        return ExpectationSnafu {
            scenario: "happy_path",
            details: "streaming-complete hook never fired".to_string(),
        }
        .fail();
    }
    if !answer.work_citation_lookup.contains_key("File0") {
        return ExpectationSnafu {
            scenario: "happy_path",
            details: "citation lookup missing File0".to_string(),
        }
        .fail();
    }
    Ok(())
}

async fn run_error_interrupt(settings: &ReplaySettings) -> Result<(), RunnerError> {
    let events = vec![
        script_event(EventKind::Startup, HAPPY_PATH_METADATA),
        script_event(EventKind::Message, "partial answer"),
        script_event(EventKind::Error, r#"{"error": "backend unavailable"}"#),
    ];
    let (stream, worker) = script::scripted_transport(events, settings.event_gap());
    tokio::spawn(worker);

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    let handle = CharacterStreamer::spawn(
        AnswerSource::Transport(stream),
        forwarding_hooks(observed_tx),
        settings.streamer_config(),
    );

    loop {
        match next_observation(&mut observed_rx, "error_interrupt", "error hook").await? {
            Observed::Error(error) => {
                let message = error.to_string();
                if !message.contains("backend unavailable") {
                    return ExpectationSnafu {
                        scenario: "error_interrupt",
                        details: format!("unexpected error message: {message}"),
                    }
                    .fail();
                }
                break;
            }
            Observed::Final(_) => {
                return ExpectationSnafu {
                    scenario: "error_interrupt",
                    details: "final answer emitted despite error".to_string(),
                }
                .fail();
            }
            Observed::Output(_) | Observed::StreamingComplete => continue,
        }
    }

    // Partial output stays visible and no final answer ever lands.
    expect_no_final_answer(&mut observed_rx, "error_interrupt").await?;
    handle.shutdown().await;
    Ok(())
}

async fn run_literal(settings: &ReplaySettings) -> Result<(), RunnerError> {
    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    let handle = CharacterStreamer::spawn(
        AnswerSource::Literal("canned example answer".to_string()),
        forwarding_hooks(observed_tx),
        settings.streamer_config(),
    );

    loop {
        match next_observation(&mut observed_rx, "literal", "fully drained output").await? {
            Observed::Output(text) => {
                if text == "canned example answer" {
                    break;
                }
            }
            Observed::Final(_) => {
                return ExpectationSnafu {
                    scenario: "literal",
                    details: "literal mode must never finalize".to_string(),
                }
                .fail();
            }
            Observed::StreamingComplete | Observed::Error(_) => {
                return ExpectationSnafu {
                    scenario: "literal",
                    details: "unexpected lifecycle hook in literal mode".to_string(),
                }
                .fail();
            }
        }
    }

    expect_no_final_answer(&mut observed_rx, "literal").await?;
    handle.shutdown().await;
    Ok(())
}

/// Replays a user-provided JSON-lines script and reports everything the
/// hooks observe; useful for inspecting recorded backend sessions.
async fn run_script(args: &RunnerArgs, settings: &ReplaySettings) -> Result<(), RunnerError> {
    let path = args.script_path.as_deref().ok_or(RunnerError::MissingScriptPath)?;
    let events = script::load_script(path).context(ScriptSnafu)?;
    tracing::info!(event_count = events.len(), path = ?path, "replaying script");

    let (stream, worker) = script::scripted_transport(events, settings.event_gap());
    tokio::spawn(worker);

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    let handle = CharacterStreamer::spawn(
        AnswerSource::Transport(stream),
        forwarding_hooks(observed_tx),
        settings.streamer_config(),
    );

    // Drain observations until the session goes quiet.
    loop {
        match timeout(QUIET_PERIOD, observed_rx.recv()).await {
            Ok(Some(Observed::Output(text))) => {
                print!("\r{}", text.replace('\n', " / "));
                let _ = std::io::Write::flush(&mut std::io::stdout());
            }
            Ok(Some(Observed::StreamingComplete)) => println!("\n-- streaming complete --"),
            Ok(Some(Observed::Final(answer))) => {
                println!("\n-- final answer --");
                println!("{}", answer.answer);
                println!(
                    "citations: {} web, {} work; {} data points",
                    answer.web_citation_lookup.len(),
                    answer.work_citation_lookup.len(),
                    answer.data_points.len()
                );
            }
            Ok(Some(Observed::Error(error))) => println!("\n-- error: {error} --"),
            Ok(None) | Err(_) => break,
        }
    }
    handle.shutdown().await;
    Ok(())
}

fn script_event(event: EventKind, data: &str) -> ScriptEvent {
    ScriptEvent {
        event,
        data: data.to_string(),
        delay_ms: None,
    }
}
