//! Track selection policy.
//!
//! Given a [`ProbeResult`] and the caller's preferences, decide which audio
//! track and which subtitle track end up in the converted file. The policy
//! is pure: it looks only at what the probe already measured.

use std::path::PathBuf;

use rh_probe::{ProbeResult, SubtitleKind, TrackDescriptor};
use serde::{Deserialize, Serialize};

/// Subtitle tracks with less extracted text than this are treated as
/// picture-like (forced overlays, bitmap subtitles).
pub const PICTURE_TEXT_THRESHOLD: usize = 32;

/// Preference for one media kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPreference {
    pub disabled: bool,
    pub external_file: Option<PathBuf>,
    pub explicit_index: Option<usize>,
    pub language: Option<String>,
}

/// Preferences for a whole conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub audio: SelectionPreference,
    pub subtitle: SelectionPreference,
}

/// How a subtitle selection is rendered into the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Composite a bitmap subtitle stream onto the video.
    Overlay,
    /// Burn in text through libass.
    Subtitles,
}

/// A resolved choice for one media kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSelection {
    pub track_index: Option<usize>,
    pub external_file: Option<PathBuf>,
    /// Only set for subtitles.
    pub filter_kind: Option<FilterKind>,
}

impl TrackSelection {
    fn track(index: usize) -> Self {
        Self {
            track_index: Some(index),
            external_file: None,
            filter_kind: None,
        }
    }

    fn file(path: PathBuf) -> Self {
        Self {
            track_index: None,
            external_file: Some(path),
            filter_kind: None,
        }
    }

    fn with_filter(mut self, kind: FilterKind) -> Self {
        self.filter_kind = Some(kind);
        self
    }
}

/// Both selections; `None` omits that kind from the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selections {
    pub audio: Option<TrackSelection>,
    pub subtitle: Option<TrackSelection>,
}

/// Run the whole policy.
pub fn select(probe: &ProbeResult, prefs: &Preferences) -> Selections {
    Selections {
        audio: select_audio(&probe.audio, &prefs.audio),
        subtitle: select_subtitle(&probe.subtitle, &prefs.subtitle),
    }
}

/// Tracks matching `language`, or every track when nothing matches.
fn by_language<'a>(tracks: &'a [TrackDescriptor], language: Option<&str>) -> Vec<&'a TrackDescriptor> {
    if let Some(lang) = language {
        let matching: Vec<_> = tracks.iter().filter(|t| t.has_language(lang)).collect();
        if !matching.is_empty() {
            return matching;
        }
    }
    tracks.iter().collect()
}

/// Pick the audio track: disabled, external file, explicit index, then the
/// heaviest track among those in the preferred language. Ties go to the
/// later track.
pub fn select_audio(tracks: &[TrackDescriptor], pref: &SelectionPreference) -> Option<TrackSelection> {
    if pref.disabled {
        return None;
    }
    if let Some(file) = &pref.external_file {
        return Some(TrackSelection::file(file.clone()));
    }
    if let Some(index) = pref.explicit_index {
        return Some(TrackSelection::track(index));
    }

    by_language(tracks, pref.language.as_deref())
        .into_iter()
        .max_by_key(|t| t.byte_size)
        .map(|t| TrackSelection::track(t.relative_index))
}

/// Pick the subtitle track and its filter.
///
/// Picture-like candidates (under [`PICTURE_TEXT_THRESHOLD`] bytes of text)
/// win over text tracks, heaviest first; otherwise the track with the most
/// text is burned in.
pub fn select_subtitle(
    tracks: &[TrackDescriptor],
    pref: &SelectionPreference,
) -> Option<TrackSelection> {
    if pref.disabled {
        return None;
    }
    if let Some(file) = &pref.external_file {
        return Some(TrackSelection::file(file.clone()).with_filter(FilterKind::Subtitles));
    }
    if tracks.is_empty() {
        return None;
    }
    if let Some(index) = pref.explicit_index {
        let kind = tracks
            .iter()
            .find(|t| t.relative_index == index)
            .map(|t| t.subtitle_kind)
            .unwrap_or_default();
        let filter = match kind {
            SubtitleKind::Picture => FilterKind::Overlay,
            SubtitleKind::Text | SubtitleKind::Unknown => FilterKind::Subtitles,
        };
        return Some(TrackSelection::track(index).with_filter(filter));
    }

    let candidates = by_language(tracks, pref.language.as_deref());
    let (pictures, texts): (Vec<&TrackDescriptor>, Vec<&TrackDescriptor>) = candidates
        .into_iter()
        .partition(|t| t.text_length < PICTURE_TEXT_THRESHOLD);

    if let Some(best) = pictures.into_iter().max_by_key(|t| t.byte_size) {
        return Some(TrackSelection::track(best.relative_index).with_filter(FilterKind::Overlay));
    }
    texts
        .into_iter()
        .max_by_key(|t| t.text_length)
        .map(|t| TrackSelection::track(t.relative_index).with_filter(FilterKind::Subtitles))
}
