//! moodsprite-cli — terminal viewer and smoke-test client for the Moodsprite relay
//!
//! # Subcommands
//! - `character`                                  — print the current character summary
//! - `history [--include-data] [--version <v>]`   — print the version history
//! - `watch [--seconds <n>]`                      — follow the live cue stream

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";
const DEFAULT_WATCH_SECONDS: u64 = 60;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "moodsprite-cli",
    version,
    about = "Moodsprite relay client — inspect the character and follow live cues"
)]
struct Cli {
    /// Moodsprite HTTP server URL (overrides MOODSPRITE_HTTP_URL env var)
    #[arg(long, env = "MOODSPRITE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Bearer token sent as `Authorization: Bearer <token>`
    #[arg(long, env = "MOODSPRITE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the current character: moods and keyframe counts
    Character,

    /// Show the character's version history
    History {
        /// Ask the server to include base64 image data
        #[arg(long)]
        include_data: bool,

        /// Only show this semantic version
        #[arg(long)]
        version: Option<String>,
    },

    /// Follow the live cue stream and resolve each cue to a keyframe
    Watch {
        /// Stop after this many seconds
        #[arg(short = 's', long, default_value_t = DEFAULT_WATCH_SECONDS)]
        seconds: u64,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub uuid: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mood {
    pub description: String,
    pub keyframes: Vec<Keyframe>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterVersion {
    pub name: String,
    #[serde(default)]
    pub changelog: String,
    pub subject_image: Option<Keyframe>,
    pub moods: Vec<Mood>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterResponse {
    pub semantic_version: String,
    pub character: CharacterVersion,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub current_name: String,
    pub latest_version: String,
    pub versions: Vec<CharacterVersion>,
}

/// One `data:` payload from `/api/stream`: either a cue or a diagnostic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    #[serde(rename_all = "camelCase")]
    Cue {
        timestamp: String,
        keyframe_uuid: String,
        duration_valid_ms: Option<u64>,
        explanation: Option<String>,
        alt_cue_text: Option<String>,
    },
    Diagnostic { error: String, message: String },
}

// ============================================================================
// Keyframe Index
// ============================================================================

/// Where a cue's uuid resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<'a> {
    Keyframe { mood: &'a str, description: &'a str },
    /// Unknown uuid; show the subject image instead.
    Subject { description: &'a str },
    /// Unknown uuid and the character has no subject image.
    Missing,
}

/// Built once from the character payload and never mutated afterwards.
#[derive(Debug)]
pub struct KeyframeIndex {
    by_uuid: HashMap<String, (String, String)>,
    subject: Option<String>,
}

impl KeyframeIndex {
    pub fn build(character: &CharacterVersion) -> Self {
        let by_uuid = character
            .moods
            .iter()
            .flat_map(|mood| {
                mood.keyframes.iter().map(move |kf| {
                    (
                        kf.uuid.clone(),
                        (mood.description.clone(), kf.description.clone()),
                    )
                })
            })
            .collect();

        Self {
            by_uuid,
            subject: character.subject_image.as_ref().map(|s| s.description.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn resolve(&self, uuid: &str) -> Resolved<'_> {
        match (self.by_uuid.get(uuid), &self.subject) {
            (Some((mood, description)), _) => Resolved::Keyframe { mood, description },
            (None, Some(description)) => Resolved::Subject { description },
            (None, None) => Resolved::Missing,
        }
    }
}

// ============================================================================
// SSE Parsing
// ============================================================================

/// Parse one line of an SSE body. Comments, blank separators and non-data
/// fields yield `None`; a data line that is not a known message is an error.
pub fn parse_sse_line(line: &str) -> Option<Result<StreamMessage, serde_json::Error>> {
    let data = line.strip_prefix("data:")?;
    Some(serde_json::from_str(data.trim_start()))
}

pub fn describe(message: &StreamMessage, index: &KeyframeIndex) -> String {
    match message {
        StreamMessage::Cue {
            timestamp,
            keyframe_uuid,
            duration_valid_ms,
            alt_cue_text,
            ..
        } => {
            let shown = match index.resolve(keyframe_uuid) {
                Resolved::Keyframe { mood, description } => format!("{} / {}", mood, description),
                Resolved::Subject { description } => format!("(subject) {}", description),
                Resolved::Missing => "(no image)".to_string(),
            };
            let mut line = format!("[{}] {}", timestamp, shown);
            if let Some(ms) = duration_valid_ms {
                line.push_str(&format!(" for {}ms", ms));
            }
            if let Some(alt) = alt_cue_text {
                line.push_str(&format!(" \"{}\"", alt));
            }
            line
        }
        StreamMessage::Diagnostic { error, message } => format!("! {}: {}", error, message),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    server: String,
    token: Option<String>,
}

impl Api {
    fn request(
        &self,
        client: &reqwest::blocking::Client,
        path: &str,
        query: &[(&str, String)],
    ) -> reqwest::blocking::RequestBuilder {
        let req = client.get(format!("{}{}", self.server, path)).query(query);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn get(
        &self,
        client: &reqwest::blocking::Client,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .request(client, path, query)
            .send()
            .with_context(|| format!("connection failed to {}", url))?;


        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            bail!("server returned {}: {}", status, body);
        }
        Ok(resp)
    }

    fn client(timeout: Option<Duration>) -> anyhow::Result<reqwest::blocking::Client> {
        Ok(reqwest::blocking::Client::builder().timeout(timeout).build()?)
    }

    fn character(&self) -> anyhow::Result<CharacterResponse> {
        let client = Self::client(Some(Duration::from_secs(30)))?;
        let resp = self.get(&client, "/api/character", &[])?;
        resp.json().context("failed to parse character response")
    }
}

fn do_character(api: &Api) -> anyhow::Result<()> {
    let c = api.character()?;
    let ch = &c.character;

    println!("{} (v{})", ch.name, c.semantic_version);
    match &ch.subject_image {
        Some(s) => println!("Subject:  {}", s.description),
        None => println!("Subject:  none"),
    }
    for mood in &ch.moods {
        println!("  {:<24} {} keyframes", mood.description, mood.keyframes.len());
    }
    Ok(())
}

fn history_query(include_data: bool, version: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("includeData", include_data.to_string())];
    if let Some(v) = version {
        query.push(("version", v.to_string()));
    }
    query
}

fn do_history(api: &Api, include_data: bool, version: Option<&str>) -> anyhow::Result<()> {
    let client = Api::client(Some(Duration::from_secs(30)))?;
    let history: HistoryResponse = api
        .get(&client, "/api/history", &history_query(include_data, version))?
        .json()
        .context("failed to parse history response")?;

    println!("{} (latest v{})", history.current_name, history.latest_version);
    for v in &history.versions {
        let keyframes: usize = v.moods.iter().map(|m| m.keyframes.len()).sum();
        println!("  {:<24} {} moods, {} keyframes", v.name, v.moods.len(), keyframes);
        if !v.changelog.is_empty() {
            println!("    {}", v.changelog);
        }
    }
    Ok(())
}

fn do_watch(api: &Api, seconds: u64) -> anyhow::Result<()> {
    let character = api.character()?;
    let index = KeyframeIndex::build(&character.character);
    eprintln!(
        "Watching {} ({} keyframes indexed) for {}s",
        character.character.name,
        index.len(),
        seconds
    );

    // The body stays open for the whole session, so no request timeout here.
    let client = Api::client(None)?;
    let resp = api.get(&client, "/api/stream", &[])?;
    let deadline = Instant::now() + Duration::from_secs(seconds);

    for line in BufReader::new(resp).lines() {
        let line = line.context("stream read failed")?;
        match parse_sse_line(&line) {
            Some(Ok(message)) => println!("{}", describe(&message, &index)),
            Some(Err(e)) => eprintln!("moodsprite-cli: unreadable event: {}", e),
            None => {}
        }
        if Instant::now() >= deadline {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let api = Api {
        server: cli.server.trim_end_matches('/').to_string(),
        token: cli.token,
    };

    let result = match cli.command {
        Commands::Character => do_character(&api),
        Commands::History {
            include_data,
            version,
        } => do_history(&api, include_data, version.as_deref()),
        Commands::Watch { seconds } => do_watch(&api, seconds),
    };

    if let Err(e) = result {
        eprintln!("moodsprite-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
