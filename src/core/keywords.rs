use std::path::Path;

/// Fixed keyword lists used to classify path text.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    event_keywords: Vec<String>,
    locations: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(event_keywords: &[String], locations: &[String]) -> Self {
        Self {
            event_keywords: event_keywords.iter().map(|k| k.to_lowercase()).collect(),
            locations: locations.iter().map(|l| l.to_lowercase()).collect(),
        }
    }

    /// First path segment containing an event keyword, returned verbatim.
    pub fn event_label(&self, path: &Path) -> Option<String> {
        path.to_string_lossy()
            .split(['/', '\\'])
            .find(|segment| {
                let lower = segment.to_lowercase();
                self.event_keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .map(str::to_string)
    }

    /// Gazetteer entries found anywhere in the path, in gazetteer order.
    pub fn locations(&self, path: &Path) -> Vec<String> {
        let lower = path.to_string_lossy().to_lowercase();
        self.locations
            .iter()
            .filter(|loc| lower.contains(loc.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let config = crate::config::Config::default();
        Self::new(&config.event_keywords, &config.locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_label_is_segment_verbatim() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.event_label(Path::new("Summer_Aug_Trip/img.jpg")).as_deref(),
            Some("Summer_Aug_Trip")
        );
        assert_eq!(
            classifier
                .event_label(Path::new("2020/IMG_2020_Paris_Wedding/a.jpg"))
                .as_deref(),
            Some("IMG_2020_Paris_Wedding")
        );
    }

    #[test]
    fn test_first_event_segment_wins() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier
                .event_label(Path::new("Birthday Party/after-party/x.jpg"))
                .as_deref(),
            Some("Birthday Party")
        );
        assert_eq!(classifier.event_label(Path::new("misc/x.jpg")), None);
    }

    #[test]
    fn test_locations_in_gazetteer_order() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.locations(Path::new("Rome then PARIS/new york.jpg")),
            vec!["paris", "new york", "rome"]
        );
        assert!(classifier.locations(Path::new("home/img.jpg")).is_empty());
    }
}
