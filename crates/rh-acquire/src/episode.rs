//! Ordering the files of a transfer by season and episode.
//!
//! Release names follow loose conventions (`S01E08`, `1x08`, `Ep. 08`,
//! `Show - 08 [1080p]`, `Season 2/...`). [`EpisodeParser`] pulls what it can
//! out of a path and [`EpisodeKey`] orders files by season, then episode,
//! then a digit-aware comparison of the whole path, so `Ep 2` sorts before
//! `Ep 10` even when no episode number is recognised.

use std::path::Path;

use regex::{Captures, Regex};
use rh_core::{Error, Result};

/// Sort key for one file of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpisodeKey {
    pub season: Option<u32>,
    pub episode: Option<u32>,
    name: Vec<Chunk>,
}

/// A run of digits or of anything else. Digit runs compare by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Number { digits: usize, value: String },
    Text(String),
}

/// Compiled release-name patterns.
#[derive(Debug, Clone)]
pub struct EpisodeParser {
    cross: Regex,
    marked: Regex,
    episode: Regex,
    season: Regex,
}

impl EpisodeParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Internal(format!("episode pattern: {e}")))
        };
        Ok(Self {
            cross: compile(r"(\d+)\s*[xX]\s*(\d+)")?,
            marked: compile(r"(?i)s\s*(\d+)\s*e\s*(\d+)")?,
            episode: compile(r"(?i)\bep(?:isode)?\.?\s*(\d+)")?,
            season: compile(r"(?i)\bseason\s*(\d+)")?,
        })
    }

    pub fn key(&self, path: &str) -> EpisodeKey {
        let (season, episode) = self.season_episode(path);
        EpisodeKey {
            season,
            episode,
            name: natural_chunks(path),
        }
    }

    /// Season and episode numbers found in `path`, if any.
    pub fn season_episode(&self, path: &str) -> (Option<u32>, Option<u32>) {
        let file = Path::new(path);
        let mut text = file
            .file_stem()
            .map(|s| s.to_string_lossy().replace(|c: char| c == '_' || c == '-', " "))
            .unwrap_or_default();

        // `1280x720` is a resolution, not season 1280.
        if let Some(caps) = self.cross.captures(&text) {
            if let (Some(season), Some(episode)) = (number(&caps, 1), number(&caps, 2)) {
                if season < 100 {
                    return (Some(season), Some(episode));
                }
            }
        }
        if let Some(caps) = self.marked.captures(&text) {
            return (number(&caps, 1), number(&caps, 2));
        }

        let mut episode = take_match(&self.episode, &mut text);
        let mut season = take_match(&self.season, &mut text);

        let (rest, groups) = strip_brackets(&text);
        if episode.is_none() {
            episode = groups
                .iter()
                .map(|g| g.trim())
                .find(|g| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|g| g.parse().ok());
        }
        if episode.is_none() {
            let mut leading = rest.split_whitespace().filter_map(leading_number);
            if let (Some(only), None) = (leading.next(), leading.next()) {
                episode = Some(only);
            }
        }

        if season.is_none() {
            season = file.parent().and_then(|dir| {
                self.season
                    .captures(&dir.to_string_lossy())
                    .and_then(|caps| number(&caps, 1))
            });
        }
        (season, episode)
    }
}

fn number(caps: &Captures<'_>, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

/// Remove the first match of `pattern` from `text` and return its number.
fn take_match(pattern: &Regex, text: &mut String) -> Option<u32> {
    let (range, value) = {
        let caps = pattern.captures(text.as_str())?;
        (caps.get(0)?.range(), number(&caps, 1))
    };
    text.replace_range(range, " ");
    value
}

/// Split off bracketed groups. Returns the text outside any bracket and
/// the contents of each top-level group.
fn strip_brackets(text: &str) -> (String, Vec<String>) {
    let mut rest = String::with_capacity(text.len());
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in text.chars() {
        match c {
            '(' | '[' | '{' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
                rest.push(' ');
            }
            ')' | ']' | '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    groups.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
            _ if depth > 0 => current.push(c),
            _ => rest.push(c),
        }
    }
    (rest, groups)
}

/// Number a token starts with, ignoring resolutions like `1080p`.
fn leading_number(token: &str) -> Option<u32> {
    let end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    if end == 0 || matches!(&token[end..], "p" | "P" | "i" | "I") {
        return None;
    }
    token[..end].parse().ok()
}

fn natural_chunks(s: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut rest = s;
    while let Some(first) = rest.chars().next() {
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(end);
        chunks.push(if digits {
            let value = head.trim_start_matches('0');
            Chunk::Number {
                digits: value.len(),
                value: value.to_string(),
            }
        } else {
            Chunk::Text(head.to_lowercase())
        });
        rest = tail;
    }
    chunks
}
