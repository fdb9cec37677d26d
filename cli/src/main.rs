/*
    jam-recorder-rs | Rust CLI tool to record a Spotify jam into a playlist.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

mod browser;
mod choice;

use anyhow::{bail, Context, Result};
use browser::LoopbackBrowser;
use choice::{parse_menu, parse_selection, DialogEvent, DialogState};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use jam_core::{
    default_playlist_name, filter_playlists, AuthState, FileStore, JamRecorder, PlaylistSummary,
    PlaylistTarget, RecordingReport, SpotifyConfig,
};
use log::warn;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "jam-recorder")]
#[command(about = "Records every track played in a Spotify jam into a playlist", long_about = None)]
struct Cli {
    /// Where tokens and the cached profile are kept (default: $JAM_STORAGE_PATH or the platform data dir)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Logs in to Spotify through the browser
    Login,
    /// Forgets all tokens and the cached profile
    Logout,
    /// Shows whether you are logged in, and as whom
    Status,
    /// Lists your playlists with their IDs
    List {
        /// Only show playlists whose name or owner matches
        #[arg(long, short = 's')]
        search: Option<String>,
    },
    /// Adds every newly played track to a playlist until Ctrl-C
    Record(RecordArgs),
}

#[derive(Args)]
struct RecordArgs {
    /// Record into this existing playlist ID
    #[arg(long, short = 'p', conflicts_with_all = ["search", "name"])]
    playlist: Option<String>,

    /// Pick an existing playlist, pre-filtered by this text
    #[arg(long, short = 's', conflicts_with = "name")]
    search: Option<String>,

    /// Create a new playlist with this name (default: "Jam [MM-DD-YYYY]")
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// Output the session report to a JSON file (e.g., --json=jam.json)
    #[arg(long)]
    json: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // No .env file; the environment alone is fine.
    }

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Login => handle_login(cli.storage.clone()).await,
        Commands::Logout => handle_logout(cli.storage.clone()),
        Commands::Status => handle_status(cli.storage.clone()).await,
        Commands::List { search } => handle_list(cli.storage.clone(), search.as_deref()).await,
        Commands::Record(args) => handle_record(cli.storage.clone(), args).await,
    };

    if let Err(e) = result {
        eprintln!();
        eprintln!("[ERROR] {:#}", e);
        process::exit(1);
    }
}

struct Session {
    app: JamRecorder,
    config: SpotifyConfig,
    storage_path: PathBuf,
}

fn open_session(storage: Option<PathBuf>) -> Result<Session> {
    let config = SpotifyConfig::from_env().context("Spotify client is not configured")?;
    let storage_path = storage.unwrap_or_else(FileStore::default_path);
    let store = FileStore::open(&storage_path)?;
    let app = JamRecorder::new(config.clone(), Arc::new(store));
    Ok(Session {
        app,
        config,
        storage_path,
    })
}

async fn require_login(app: &JamRecorder) -> Result<()> {
    if !app.restore_session().await {
        bail!("Not logged in. Run 'jam-recorder login' first.");
    }
    Ok(())
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}..", text.chars().take(max - 2).collect::<String>())
    } else {
        text.to_string()
    }
}

async fn handle_login(storage: Option<PathBuf>) -> Result<()> {
    let session = open_session(storage)?;
    let browser = LoopbackBrowser::new(&session.config.redirect_uri)?;

    session.app.authorize(&browser).await?;
    if !session.app.handle_callback(&browser).await {
        bail!("Spotify authorization failed. Run 'jam-recorder login' to try again.");
    }

    match session.app.profile().get_profile().await {
        Ok(profile) => println!("[OK] Logged in as {}.", profile.name()),
        Err(e) => {
            warn!("Logged in, but the profile could not be loaded: {}", e);
            println!("[OK] Logged in.");
        }
    }
    Ok(())
}

fn handle_logout(storage: Option<PathBuf>) -> Result<()> {
    let session = open_session(storage)?;
    session.app.logout();
    println!("[OK] Logged out. Stored tokens were removed.");
    Ok(())
}

async fn handle_status(storage: Option<PathBuf>) -> Result<()> {
    let session = open_session(storage)?;
    let app = &session.app;
    let authenticated = app.restore_session().await;

    println!("---------------------------------------------------");
    println!("JAM RECORDER STATUS");
    println!("---------------------------------------------------");
    println!(
        "Session:   {}",
        match app.auth_state() {
            AuthState::Authenticated => "Logged in",
            AuthState::Authorizing => "Login in progress",
            AuthState::LoggedOut => "Logged out",
        }
    );

    let profile = if authenticated {
        match app.profile().get_profile().await {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Could not load the profile: {}", e);
                app.profile().cached()
            }
        }
    } else {
        None
    };
    if let Some(profile) = profile {
        println!("User:      {} ({})", profile.name(), profile.id);
        if let Some(product) = &profile.product {
            println!("Plan:      {}", product);
        }
    }
    println!("Storage:   {}", session.storage_path.display());
    println!("---------------------------------------------------");

    if !authenticated {
        println!();
        println!("Tip: run 'jam-recorder login' to connect your Spotify account.");
    }
    Ok(())
}

fn print_playlists(playlists: &[&PlaylistSummary], numbered: bool) {
    println!();
    println!(
        "{:>3} | {:<22} | {:<30} | {:<20} | {:<6} | {:<5}",
        "#", "ID", "Name", "Owner", "Tracks", "Collab"
    );
    println!(
        "{:->3}-+-{:-<22}-+-{:-<30}-+-{:-<20}-+-{:-<6}-+-{:-<5}",
        "", "", "", "", "", ""
    );

    for (i, pl) in playlists.iter().enumerate() {
        let number = if numbered {
            (i + 1).to_string()
        } else {
            String::new()
        };
        let collab = if pl.is_collaborative { "Yes" } else { "No" };
        println!(
            "{:>3} | {:<22} | {:<30} | {:<20} | {:<6} | {:<5}",
            number,
            pl.id,
            truncate(&pl.name, 30),
            truncate(&pl.owner_name, 20),
            pl.total_tracks,
            collab
        );
    }
}

async fn handle_list(storage: Option<PathBuf>, search: Option<&str>) -> Result<()> {
    let session = open_session(storage)?;
    require_login(&session.app).await?;
    println!("Fetching your playlists...");

    let playlists = session
        .app
        .gateway()
        .user_playlists()
        .await
        .context("Failed to list playlists")?;
    let shown = filter_playlists(&playlists, search.unwrap_or(""));

    if shown.is_empty() {
        println!();
        println!("No playlists found.");
        return Ok(());
    }
    print_playlists(&shown, false);
    println!();
    println!("Tip: Copy an ID and run 'jam-recorder record --playlist <ID>'");
    Ok(())
}

/// Walks the playlist dialog. Command line flags answer the first pass;
/// going back to the menu makes it interactive.
async fn choose_target(app: &JamRecorder, args: &RecordArgs) -> Result<Option<PlaylistTarget>> {
    let default_name = default_playlist_name(chrono::Local::now().date_naive());
    let mut from_flags = args.name.is_some() || args.playlist.is_some() || args.search.is_some();
    let mut state = DialogState::Choice;

    while !state.is_terminal() {
        let event = match &state {
            DialogState::Choice if from_flags && args.name.is_some() => DialogEvent::PickCreate {
                default_name: default_name.clone(),
            },
            DialogState::Choice if from_flags => DialogEvent::PickExisting {
                query: args.search.clone().unwrap_or_default(),
            },
            DialogState::Choice => {
                println!();
                println!("Where should the jam be recorded?");
                println!("  [1] Create a new playlist");
                println!("  [2] Choose one of your playlists");
                match prompt("Choice (1/2, q to quit): ")? {
                    None => DialogEvent::Cancel,
                    Some(answer) => match parse_menu(&answer, &default_name) {
                        Some(event) => event,
                        None => continue,
                    },
                }
            }
            DialogState::CreateNew { name } => {
                let answer = match (&args.name, from_flags) {
                    (Some(flag), true) => Some(flag.clone()),
                    _ => prompt(&format!("Playlist name [{}] (b to go back): ", name))?,
                };
                from_flags = false;

                match answer.as_deref() {
                    None | Some("q") => DialogEvent::Cancel,
                    Some("b") => DialogEvent::Back,
                    Some(answer) => {
                        let name = if answer.is_empty() { name.as_str() } else { answer };
                        println!("Creating playlist '{}'...", name);
                        let created = app
                            .gateway()
                            .create_playlist(name)
                            .await
                            .context("Failed to create the playlist")?;
                        DialogEvent::Created(created)
                    }
                }
            }
            DialogState::ChooseExisting { query } => {
                let auto = from_flags;
                from_flags = false;

                if let (true, Some(id)) = (auto, &args.playlist) {
                    let playlist = app
                        .gateway()
                        .playlist(id)
                        .await
                        .with_context(|| format!("Could not open playlist {}", id))?;
                    DialogEvent::Chose(playlist)
                } else {
                    let playlists = app
                        .gateway()
                        .user_playlists()
                        .await
                        .context("Failed to list playlists")?;
                    let shown = filter_playlists(&playlists, query);

                    if auto && shown.len() == 1 {
                        DialogEvent::Chose(shown[0].clone())
                    } else {
                        if shown.is_empty() {
                            println!();
                            println!("No playlists match '{}'.", query);
                        } else {
                            print_playlists(&shown, true);
                        }
                        println!();
                        match prompt("Number, /text to search, b to go back, q to quit: ")? {
                            None => DialogEvent::Cancel,
                            Some(answer) => match parse_selection(&answer, &shown) {
                                Some(event) => event,
                                None => continue,
                            },
                        }
                    }
                }
            }
            DialogState::Selected(_) | DialogState::Cancelled => break,
        };
        state = state.next(event);
    }

    Ok(match state {
        DialogState::Selected(target) => Some(target),
        _ => None,
    })
}

fn print_report(report: &RecordingReport) {
    println!();
    println!("---------------------------------------------------");
    println!("JAM REPORT");
    println!("---------------------------------------------------");
    println!("Playlist:       {}", report.playlist.web_url);
    println!("Tracks Seen:    {}", report.tracks.len());
    println!("Tracks Added:   {}", report.confirmed_count());
    println!("---------------------------------------------------");

    if !report.tracks.is_empty() {
        println!();
        for (i, track) in report.tracks.iter().enumerate() {
            println!("{}. {}", i + 1, track);
        }
        println!();
        println!("Legend:");
        println!("  [ADDED]:   Spotify confirmed the track was appended.");
        println!("  [PENDING]: The append failed or never finished; it is not retried.");
    }
}

fn save_report(report: &RecordingReport, path: &str) {
    match File::create(path) {
        Ok(mut file) => {
            let json_content = serde_json::to_string_pretty(report).unwrap_or_default();
            if let Err(e) = file.write_all(json_content.as_bytes()) {
                eprintln!();
                eprintln!("[ERROR] Failed to write report to file: {}", e);
            } else {
                println!();
                println!("[SAVED] Report saved to: {}", path);
            }
        }
        Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
    }
}

async fn handle_record(storage: Option<PathBuf>, args: &RecordArgs) -> Result<()> {
    let session = open_session(storage)?;
    let app = &session.app;
    require_login(app).await?;

    let Some(target) = choose_target(app, args).await? else {
        println!("Cancelled.");
        return Ok(());
    };

    app.start_recording(target.clone());
    println!();
    println!("[REC] Recording into {}", target.web_url);
    println!("      Press Ctrl-C to stop.");

    let mut printed = 0;
    let mut refresh = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = refresh.tick() => {
                let tracks = app.get_added_tracks();
                for track in tracks.iter().skip(printed) {
                    println!("   + {}", track.display_name);
                }
                printed = tracks.len();

                // An expired token with a refresh pending is not the end.
                if !app.has_session() {
                    eprintln!();
                    eprintln!(
                        "[ERROR] Spotify session ended. Run 'jam-recorder login' and record again."
                    );
                    break;
                }
            }
        }
    }

    let Some(report) = app.stop_recording() else {
        return Ok(());
    };
    print_report(&report);
    if let Some(path) = args.json.as_deref() {
        save_report(&report, path);
    }
    Ok(())
}
