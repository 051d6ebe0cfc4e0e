//! nup - query a song library through a two-tier result cache

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use nup::cache::{CacheCoordinator, CacheTier, DurableTier, FastTier};
use nup::config::QueryConfig;
use nup::core::LibraryUpdater;
use nup::models::{FallbackMode, RatingThreshold, SongQuery, SongsFlags, UpdateKind};
use nup::stores::MemorySongStore;
use nup::utils::dates::parse_date;

/// nup - song queries with two-tier result caching
#[derive(Parser, Debug)]
#[command(name = "nup")]
#[command(version)]
#[command(about = "Query a song library through a fast and a durable result cache")]
struct Args {
    /// JSON song dump to load (array or one song per line)
    #[arg(long, global = true)]
    songs: Option<PathBuf>,

    /// Config file (JSON, TOML or YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a song query
    Query(QueryArgs),

    /// List all tags in use
    Tags {
        /// Fail instead of scanning songs if tags aren't cached
        #[arg(long)]
        require_cache: bool,
    },

    /// Drop cached data made stale by an update
    Invalidate {
        /// Comma-separated update kinds: metadata, rating, tags, plays
        #[arg(long, value_parser = parse_update_kind)]
        kind: UpdateKind,
    },

    /// Remove everything from one cache tier
    Flush {
        /// "fast" or "durable"
        #[arg(long, value_parser = parse_tier)]
        tier: CacheTier,
    },

    /// Record a play of a song
    Play {
        id: i64,

        /// Play start time (defaults to now)
        #[arg(long, value_parser = parse_time)]
        time: Option<DateTime<Utc>>,
    },

    /// Set a song's rating and/or tags
    Rate {
        id: i64,

        /// Rating in [0.0, 1.0], or -1 to clear it
        #[arg(long, allow_negative_numbers = true, value_parser = parse_song_rating)]
        rating: Option<f64>,

        /// Comma-separated tags replacing the song's current ones
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    artist: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    album: Option<String>,

    #[arg(long)]
    album_id: Option<String>,

    /// Keyword that must appear in the artist, title or album (repeatable)
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// Minimum rating: 0, 0.25, 0.5, 0.75 or 1
    #[arg(long, value_parser = parse_rating)]
    min_rating: Option<RatingThreshold>,

    /// Only unrated songs
    #[arg(long)]
    unrated: bool,

    #[arg(long)]
    max_plays: Option<i64>,

    /// Only songs first played at or after this time
    #[arg(long, value_parser = parse_time)]
    first_played_after: Option<DateTime<Utc>>,

    /// Only songs last played at or before this time
    #[arg(long, value_parser = parse_time)]
    last_played_before: Option<DateTime<Utc>>,

    #[arg(long)]
    track: Option<i64>,

    #[arg(long)]
    disc: Option<i64>,

    #[arg(long)]
    max_disc: Option<i64>,

    /// Required tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Excluded tag (repeatable)
    #[arg(long = "not-tag")]
    not_tags: Vec<String>,

    #[arg(long)]
    shuffle: bool,

    /// Least recently played songs first
    #[arg(long)]
    oldest_first: bool,

    /// Return nothing rather than querying songs on a cache miss
    #[arg(long)]
    cache_only: bool,

    /// Fallback planning: "auto", "force" or "never"
    #[arg(long, value_parser = parse_fallback, default_value = "auto")]
    fallback: FallbackMode,
}

impl QueryArgs {
    fn to_query(&self) -> SongQuery {
        SongQuery {
            artist: self.artist.clone().unwrap_or_default(),
            title: self.title.clone().unwrap_or_default(),
            album: self.album.clone().unwrap_or_default(),
            album_id: self.album_id.clone().unwrap_or_default(),
            keywords: self.keywords.clone(),
            min_rating: self.min_rating,
            unrated: self.unrated,
            max_plays: self.max_plays,
            min_first_start_time: self.first_played_after,
            max_last_start_time: self.last_played_before,
            track: self.track,
            disc: self.disc,
            max_disc: self.max_disc,
            tags: self.tags.clone(),
            not_tags: self.not_tags.clone(),
            shuffle: self.shuffle,
            order_by_last_start_time: self.oldest_first,
        }
    }

    fn flags(&self) -> SongsFlags {
        SongsFlags {
            cache_only: self.cache_only,
            fallback: self.fallback,
        }
    }
}

fn parse_update_kind(s: &str) -> Result<UpdateKind, String> {
    UpdateKind::parse(s).ok_or_else(|| format!("invalid update kind {:?}", s))
}

fn parse_tier(s: &str) -> Result<CacheTier, String> {
    CacheTier::from_str(s).ok_or_else(|| format!("invalid cache tier {:?}", s))
}

fn parse_fallback(s: &str) -> Result<FallbackMode, String> {
    FallbackMode::from_str(s).ok_or_else(|| format!("invalid fallback mode {:?}", s))
}

fn parse_rating(s: &str) -> Result<RatingThreshold, String> {
    s.parse::<f64>()
        .ok()
        .and_then(RatingThreshold::from_value)
        .ok_or_else(|| format!("invalid rating {:?}", s))
}

fn parse_song_rating(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v == -1.0 || (0.0..=1.0).contains(&v) => Ok(v),
        _ => Err(format!("rating must be in [0, 1] or -1, got {:?}", s)),
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    parse_date(s).ok_or_else(|| format!("invalid time {:?}", s))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::new(format!("{},sqlx=warn", log_level));

    // logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let config = QueryConfig::load(args.config.as_deref())?;

    let store = Arc::new(MemorySongStore::new());
    match &args.songs {
        Some(path) => {
            store.load_from_file(path)?;
        }
        None => warn!("No song dump given; the library is empty"),
    }

    let db_path = config.durable_db_path();
    let durable = DurableTier::open(&db_path)
        .await
        .with_context(|| format!("Failed to open cache database {}", db_path.display()))?;
    info!("Durable cache: {}", db_path.display());
    let fast = FastTier::new(config.fast_tier_capacity, config.fast_tier_ttl());

    let cache = Arc::new(CacheCoordinator::new(
        store.clone(),
        Arc::new(fast),
        Arc::new(durable),
        &config,
    ));

    match args.command {
        Command::Query(query_args) => {
            let songs = cache
                .songs(&query_args.to_query(), query_args.flags())
                .await?;
            print_json(&songs)?;
        }
        Command::Tags { require_cache } => {
            print_json(&cache.tags(require_cache).await?)?;
        }
        Command::Invalidate { kind } => {
            cache.invalidate_for_update(kind).await?;
            info!("Invalidated cached data for {} update", kind);
        }
        Command::Flush { tier } => {
            cache.flush(tier).await?;
            info!("Flushed {} cache", tier);
        }
        Command::Play { id, time } => {
            let updater = LibraryUpdater::new(store.clone(), cache.clone());
            let song = updater.record_play(id, time.unwrap_or_else(Utc::now)).await?;
            save_songs(&store, args.songs.as_ref())?;
            print_json(&song)?;
        }
        Command::Rate { id, rating, tags } => {
            let updater = LibraryUpdater::new(store.clone(), cache.clone());
            let song = updater.rate_and_tag(id, rating, tags).await?;
            save_songs(&store, args.songs.as_ref())?;
            print_json(&song)?;
        }
    }

    Ok(())
}

/// Write updated songs back to the dump they were loaded from
fn save_songs(store: &MemorySongStore, path: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = path {
        store.save_to_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_song_rating() {
        assert_eq!(parse_song_rating("0.75"), Ok(0.75));
        assert_eq!(parse_song_rating("-1"), Ok(-1.0));
        assert!(parse_song_rating("NaN").is_err());
        assert!(parse_song_rating("1.5").is_err());
        assert!(parse_song_rating("-0.5").is_err());
    }

    #[test]
    fn test_rate_args() {
        let args =
            Args::try_parse_from(["nup", "rate", "3", "--rating", "-1", "--tags", "a,b"]).unwrap();
        match args.command {
            Command::Rate { id, rating, tags } => {
                assert_eq!(id, 3);
                assert_eq!(rating, Some(-1.0));
                assert_eq!(tags, Some(vec!["a".to_string(), "b".to_string()]));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Args::try_parse_from(["nup", "rate", "3", "--rating", "nan"]).is_err());
    }
}
