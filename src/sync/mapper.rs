//! Pure path translation between the source, pointer and upstream trees.

/// Substitute the `from_root` prefix of `path` with `to_root`.
///
/// Callers match the rule before mapping; a path outside `from_root`
/// comes back unchanged rather than erroring.
pub fn map_to(path: &str, from_root: &str, to_root: &str) -> String {
    match path.strip_prefix(from_root) {
        Some(rest) => format!("{to_root}{rest}"),
        None => path.to_string(),
    }
}

/// Fill a pointer-content template.
///
/// `{local_file}` wins when both placeholders appear. `{cloud_file}` is
/// either percent-encoded wholesale or normalized to forward slashes.
/// A template with neither placeholder yields `None`.
pub fn format_content(
    template: &str,
    local_file: &str,
    cloud_file: &str,
    url_encode: bool,
) -> Option<String> {
    if template.contains("{local_file}") {
        Some(template.replace("{local_file}", local_file))
    } else if template.contains("{cloud_file}") {
        let cloud = if url_encode {
            urlencoding::encode(cloud_file).into_owned()
        } else {
            cloud_file.replace('\\', "/")
        };
        Some(template.replace("{cloud_file}", &cloud))
    } else {
        None
    }
}

/// Apply the configured literal replacements, in order.
pub fn apply_replacements(content: &str, replacements: &[(String, String)]) -> String {
    let mut content = content.to_string();
    for (from, to) in replacements {
        if content.contains(from.as_str()) {
            content = content.replace(from.as_str(), to);
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_to_substitutes_prefix() {
        assert_eq!(
            map_to("/src/ShowX/S01E01.mkv", "/src", "/ptr"),
            "/ptr/ShowX/S01E01.mkv"
        );
    }

    #[test]
    fn test_map_to_passes_through_unmatched() {
        assert_eq!(map_to("/other/file.mkv", "/src", "/ptr"), "/other/file.mkv");
    }

    #[test]
    fn test_format_content_local_placeholder() {
        assert_eq!(
            format_content("{local_file}", "/src/a.mkv", "/cloud/a.mkv", false),
            Some("/src/a.mkv".to_string())
        );
    }

    #[test]
    fn test_format_content_cloud_normalizes_backslashes() {
        assert_eq!(
            format_content(
                "http://host:5244/d{cloud_file}",
                "/src/a.mkv",
                "\\cloud\\a.mkv",
                false
            ),
            Some("http://host:5244/d/cloud/a.mkv".to_string())
        );
    }

    #[test]
    fn test_format_content_cloud_encoded() {
        assert_eq!(
            format_content("{cloud_file}", "/src/a.mkv", "/cloud/片 1.mkv", true),
            Some("%2Fcloud%2F%E7%89%87%201.mkv".to_string())
        );
    }

    #[test]
    fn test_format_content_without_placeholder() {
        assert_eq!(format_content("static", "/a", "/b", false), None);
    }

    #[test]
    fn test_apply_replacements_in_order() {
        let reps = vec![
            ("/cloud".to_string(), "/mnt".to_string()),
            ("/mnt/a".to_string(), "/never".to_string()),
        ];
        // the first rule rewrites, the second then matches the result
        assert_eq!(apply_replacements("/cloud/a/x.mkv", &reps), "/never/x.mkv");
    }
}
