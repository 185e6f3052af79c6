//! Lightweight media filename parsing: enough title/year/season/episode
//! signal to key notification batches, nothing more.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Series,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMeta {
    pub title: String,
    pub year: Option<u16>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub tmdb_id: Option<u64>,
}

fn season_episode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)S(\d{1,2})[\s._-]*E(\d{1,4})").unwrap())
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((19\d{2}|20\d{2})\)|\b(19\d{2}|20\d{2})\b").unwrap())
}

fn tmdb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[\[{](?:tmdbid|tmdb)[=-](\d+)[\]}]").unwrap())
}

fn season_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(season[\s._-]*\d+|S\d{1,2})$").unwrap())
}

impl MediaMeta {
    pub fn kind(&self) -> MediaKind {
        if self.season.is_some() {
            MediaKind::Series
        } else {
            MediaKind::Movie
        }
    }

    /// Batch key: `Title (Year) SNN`, parts dropped when unknown. One
    /// key per title+season groups a burst of episode files.
    pub fn aggregation_key(&self) -> String {
        let mut key = self.title.clone();
        if let Some(year) = self.year {
            key.push_str(&format!(" ({year})"));
        }
        if let Some(season) = self.season {
            key.push_str(&format!(" S{season:02}"));
        }
        key
    }
}

/// Parse title/year/season/episode out of a media path. The filename is
/// the primary source; a bare `S01E01.mkv` falls back to its show
/// directory (skipping a `Season NN` level) for the title and year.
pub fn parse_path(path: &Path) -> MediaMeta {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let full = path.to_string_lossy();

    let tmdb_id = tmdb_re()
        .captures(&full)
        .and_then(|caps| caps[1].parse().ok());

    let (season, episode, se_start) = match season_episode_re().captures(&stem) {
        Some(caps) => {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            (
                caps[1].parse().ok(),
                caps[2].parse().ok(),
                Some(start),
            )
        }
        None => (None, None, None),
    };

    let title_part = match se_start {
        Some(start) => stem[..start].to_string(),
        None => stem.clone(),
    };
    let (mut title, mut year) = split_title_year(&title_part);

    if title.is_empty() {
        if let Some(dir) = show_dir_name(path) {
            let (dir_title, dir_year) = split_title_year(&dir);
            title = dir_title;
            year = year.or(dir_year);
        }
    } else if year.is_none() {
        if let Some(dir) = show_dir_name(path) {
            let (_, dir_year) = split_title_year(&dir);
            year = dir_year;
        }
    }

    MediaMeta {
        title,
        year,
        season,
        episode,
        tmdb_id,
    }
}

/// Strip a trailing year (with or without parentheses) out of a raw
/// title fragment and clean up separator punctuation.
fn split_title_year(raw: &str) -> (String, Option<u16>) {
    let mut year = None;
    let mut title_end = raw.len();

    if let Some(caps) = year_re().captures_iter(raw).last() {
        let m = caps.get(0).unwrap();
        let digits = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|g| g.as_str())
            .unwrap_or("");
        year = digits.parse().ok();
        // only trim the year off when it trails the title
        if raw[m.end()..].trim_matches([' ', '.', '_', '-']).is_empty() {
            title_end = m.start();
        }
    }

    let title = raw[..title_end]
        .replace(['.', '_'], " ")
        .trim_matches([' ', '-'])
        .to_string();
    (title, year)
}

/// Name of the directory that most plausibly carries the show title:
/// the parent, or the grandparent when the parent is a `Season NN`
/// level.
fn show_dir_name(path: &Path) -> Option<String> {
    let parent = path.parent()?;
    let parent_name = parent.file_name()?.to_string_lossy().to_string();
    if season_dir_re().is_match(&parent_name) {
        let grand = parent.parent()?;
        return Some(grand.file_name()?.to_string_lossy().to_string());
    }
    Some(parent_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_episode_filename() {
        let meta = parse_path(&PathBuf::from("/ptr/ShowX (2024)/ShowX - S01E03.strm"));
        assert_eq!(meta.title, "ShowX");
        assert_eq!(meta.year, Some(2024));
        assert_eq!(meta.season, Some(1));
        assert_eq!(meta.episode, Some(3));
        assert_eq!(meta.kind(), MediaKind::Series);
        assert_eq!(meta.aggregation_key(), "ShowX (2024) S01");
    }

    #[test]
    fn test_parse_dotted_filename() {
        let meta = parse_path(&PathBuf::from("/ptr/Some.Show.2023.S02E11.1080p.strm"));
        assert_eq!(meta.title, "Some Show");
        assert_eq!(meta.year, Some(2023));
        assert_eq!(meta.season, Some(2));
        assert_eq!(meta.episode, Some(11));
    }

    #[test]
    fn test_parse_movie() {
        let meta = parse_path(&PathBuf::from("/ptr/Movies/Arrival (2016).strm"));
        assert_eq!(meta.title, "Arrival");
        assert_eq!(meta.year, Some(2016));
        assert_eq!(meta.kind(), MediaKind::Movie);
        assert_eq!(meta.aggregation_key(), "Arrival (2016)");
    }

    #[test]
    fn test_bare_episode_uses_show_directory() {
        let meta = parse_path(&PathBuf::from("/ptr/ShowY (2020)/Season 01/S01E05.strm"));
        assert_eq!(meta.title, "ShowY");
        assert_eq!(meta.year, Some(2020));
        assert_eq!(meta.season, Some(1));
        assert_eq!(meta.episode, Some(5));
    }

    #[test]
    fn test_tmdb_tag_in_path() {
        let meta = parse_path(&PathBuf::from(
            "/ptr/ShowZ (2021) [tmdbid=12345]/S01E01.strm",
        ));
        assert_eq!(meta.tmdb_id, Some(12345));
    }

    #[test]
    fn test_no_metadata_at_all() {
        let meta = parse_path(&PathBuf::from("/ptr/random/clip.strm"));
        assert_eq!(meta.title, "clip");
        assert_eq!(meta.year, None);
        assert_eq!(meta.kind(), MediaKind::Movie);
        assert_eq!(meta.aggregation_key(), "clip");
    }
}
