use std::fmt;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use crate::cli::config::ContentThresholds;

/// Words that show up in loading shells and skeleton screens
const SKELETON_MARKERS: [&str; 6] = [
    "loading",
    "skeleton",
    "placeholder",
    "spinner",
    "shimmer",
    "pulse",
];

/// Elements whose text never reaches the reader
const INVISIBLE_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Mount points used by the common client-side frameworks
const APP_MOUNT_SELECTOR: &str =
    "#root, #app, #__next, #__nuxt, #___gatsby, [data-reactroot], [ng-app]";

/// Pages above this size get a more lenient text-to-markup threshold
const LARGE_PAGE_BYTES: usize = 100_000;

/// The ratio check is only enforced below this size
const RATIO_CHECK_MAX_BYTES: usize = 50_000;

/// Why a piece of content was not accepted
#[derive(Debug, Clone, PartialEq)]
pub enum InsufficientReason {
    Absent,
    TooShort { bytes: usize, min: usize },
    TooLittleText { chars: usize, min: usize },
    TooFewElements { count: usize, min: usize },
    LowTextRatio { ratio: f64, threshold: f64 },
    SkeletonMarkers { count: usize },
    LayoutHeavy { divs: usize, chars: usize },
    EmptyMountPoint,
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "no content received"),
            Self::TooShort { bytes, min } => {
                write!(f, "content too short ({bytes} bytes, need {min})")
            }
            Self::TooLittleText { chars, min } => {
                write!(f, "visible text too short ({chars} chars, need {min})")
            }
            Self::TooFewElements { count, min } => {
                write!(f, "too few meaningful elements ({count}, need {min})")
            }
            Self::LowTextRatio { ratio, threshold } => {
                write!(f, "low text-to-markup ratio ({ratio:.4} < {threshold})")
            }
            Self::SkeletonMarkers { count } => {
                write!(f, "multiple skeleton indicators ({count})")
            }
            Self::LayoutHeavy { divs, chars } => {
                write!(f, "layout-heavy, content-light ({divs} divs, {chars} chars)")
            }
            Self::EmptyMountPoint => write!(f, "application mount point was never rendered"),
        }
    }
}

/// Classifier verdict for one piece of content
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Sufficient,
    Insufficient(InsufficientReason),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Sufficient => write!(f, "sufficient"),
            Verdict::Insufficient(reason) => write!(f, "insufficient: {reason}"),
        }
    }
}

impl Verdict {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Verdict::Sufficient)
    }

    pub fn reason(&self) -> Option<&InsufficientReason> {
        match self {
            Verdict::Sufficient => None,
            Verdict::Insufficient(reason) => Some(reason),
        }
    }
}

/// Decides whether fetched markup is a real render or an empty shell.
///
/// The classifier holds nothing but its thresholds, so the same input always
/// produces the same verdict and one instance can be shared by every tier.
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    thresholds: ContentThresholds,
}

impl ContentClassifier {
    pub fn new(thresholds: ContentThresholds) -> Self {
        Self { thresholds }
    }

    /// Classify raw content, which is `None` when nothing was received
    pub fn classify(&self, content: Option<&str>) -> Verdict {
        match content {
            None => Verdict::Insufficient(InsufficientReason::Absent),
            Some(html) if html.trim().is_empty() => {
                Verdict::Insufficient(InsufficientReason::Absent)
            }
            Some(html) => match self.check(html) {
                Ok(()) => Verdict::Sufficient,
                Err(reason) => {
                    debug!("Content classified as insufficient: {}", reason);
                    Verdict::Insufficient(reason)
                }
            },
        }
    }

    fn check(&self, html: &str) -> Result<(), InsufficientReason> {
        let t = &self.thresholds;

        let bytes = html.len();
        if bytes < t.min_content_length {
            return Err(InsufficientReason::TooShort {
                bytes,
                min: t.min_content_length,
            });
        }

        let doc = Html::parse_document(html);
        let text = visible_text(&doc);
        let chars = text.chars().count();
        if chars < t.min_text_length {
            return Err(InsufficientReason::TooLittleText {
                chars,
                min: t.min_text_length,
            });
        }

        let count = meaningful_elements(&doc);
        if count < t.min_meaningful_elements {
            return Err(InsufficientReason::TooFewElements {
                count,
                min: t.min_meaningful_elements,
            });
        }

        let markup = bytes.saturating_sub(text.len());
        if markup > 0 && bytes < RATIO_CHECK_MAX_BYTES {
            let ratio = text.len() as f64 / markup as f64;
            let threshold = if bytes > LARGE_PAGE_BYTES {
                t.text_to_markup_ratio * 0.5
            } else {
                t.text_to_markup_ratio
            };
            if ratio < threshold {
                return Err(InsufficientReason::LowTextRatio { ratio, threshold });
            }
        }

        let lower = html.to_lowercase();
        let markers = SKELETON_MARKERS
            .iter()
            .filter(|marker| lower.contains(*marker))
            .count();
        if markers >= 3 && chars < t.min_text_length * 2 {
            return Err(InsufficientReason::SkeletonMarkers { count: markers });
        }

        let divs = count_elements(&doc, "div");
        if divs > 20 && chars < t.min_text_length * 3 {
            return Err(InsufficientReason::LayoutHeavy { divs, chars });
        }

        if chars < t.min_text_length * 3 && has_empty_mount_point(&doc) {
            return Err(InsufficientReason::EmptyMountPoint);
        }

        Ok(())
    }
}

/// Whitespace-collapsed text outside of script, style and similar elements
fn visible_text(doc: &Html) -> String {
    let mut words: Vec<&str> = Vec::new();
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |el| INVISIBLE_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

fn meaningful_elements(doc: &Html) -> usize {
    let mut count = 0;

    if let Ok(blocks) = Selector::parse("p, article, section, div") {
        count += doc
            .select(&blocks)
            .filter(|el| has_direct_text(el))
            .count();
    }
    if let Ok(images) = Selector::parse("img[src]") {
        count += doc.select(&images).count();
    }
    if let Ok(links) = Selector::parse("a[href]") {
        count += doc.select(&links).count();
    }

    count
}

fn has_direct_text(element: &ElementRef<'_>) -> bool {
    element.children().any(|child| {
        child
            .value()
            .as_text()
            .map_or(false, |text| !text.trim().is_empty())
    })
}

fn count_elements(doc: &Html, name: &str) -> usize {
    Selector::parse(name)
        .map(|sel| doc.select(&sel).count())
        .unwrap_or(0)
}

fn has_empty_mount_point(doc: &Html) -> bool {
    let Ok(selector) = Selector::parse(APP_MOUNT_SELECTOR) else {
        return false;
    };
    doc.select(&selector).any(|mount| {
        let has_children = mount.children().any(|child| child.value().is_element());
        let has_text = mount.text().any(|t| !t.trim().is_empty());
        !has_children && !has_text
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ContentClassifier {
        ContentClassifier::new(ContentThresholds::default())
    }

    fn article_page(paragraphs: usize) -> String {
        let mut body = String::new();
        for i in 0..paragraphs {
            body.push_str(&format!(
                "<p>Paragraph {i} of the harvest report explains how the orchard crews \
                 counted apples, pears and plums across the northern rows this season.</p>\
                 <a href=\"/report/{i}\">Read section {i}</a>"
            ));
        }
        format!("<html><head><title>Report</title></head><body><article>{body}</article></body></html>")
    }

    #[test]
    fn test_absent_and_empty_content() {
        let c = classifier();
        assert_eq!(
            c.classify(None),
            Verdict::Insufficient(InsufficientReason::Absent)
        );
        assert_eq!(
            c.classify(Some("   \n ")),
            Verdict::Insufficient(InsufficientReason::Absent)
        );
    }

    #[test]
    fn test_short_content_is_always_insufficient() {
        let c = classifier();
        let html = "<html><body><p>Hello</p></body></html>";
        assert!(matches!(
            c.classify(Some(html)),
            Verdict::Insufficient(InsufficientReason::TooShort { .. })
        ));
    }

    #[test]
    fn test_rendered_article_is_sufficient() {
        let c = classifier();
        let html = article_page(10);
        assert_eq!(c.classify(Some(&html)), Verdict::Sufficient);
    }

    #[test]
    fn test_script_heavy_page_is_insufficient() {
        let c = classifier();
        let bundle = "window.__STATE__ = {\"items\": []};".repeat(200);
        let html = format!(
            "<html><head><style>body {{ margin: 0 }}</style></head>\
             <body><div id=\"root\"></div><script>{bundle}</script></body></html>"
        );
        assert!(html.len() > 1000);
        assert!(matches!(
            c.classify(Some(&html)),
            Verdict::Insufficient(InsufficientReason::TooLittleText { .. })
        ));
    }

    #[test]
    fn test_skeleton_markers_with_thin_text() {
        let c = classifier();
        let filler = "Product listing preview text for the catalogue. ".repeat(6);
        let links = (0..6)
            .map(|i| format!("<a href=\"/p/{i}\">item {i}</a>"))
            .collect::<String>();
        let html = format!(
            "<html><body><div class=\"skeleton shimmer\"><p>{filler}</p></div>\
             <div class=\"spinner\">{links}</div></body></html>"
        );
        let html = format!("{html}{}", " ".repeat(1000));
        assert!(matches!(
            c.classify(Some(&html)),
            Verdict::Insufficient(InsufficientReason::SkeletonMarkers { count: 3 })
        ));
    }

    #[test]
    fn test_empty_mount_point_with_thin_text() {
        let c = classifier();
        let copy = "Welcome to the shop, sign in to see your saved baskets and orders. ".repeat(5);
        let nav = (0..5)
            .map(|i| format!("<a href=\"/nav/{i}\">Menu {i}</a>"))
            .collect::<String>();
        let html = format!(
            "<html><body><header><p>{copy}</p>{nav}</header><div id=\"__next\"></div></body></html>"
        );
        let html = format!("{html}{}", " ".repeat(1000));
        assert_eq!(
            c.classify(Some(&html)),
            Verdict::Insufficient(InsufficientReason::EmptyMountPoint)
        );
    }

    #[test]
    fn test_verdict_is_stable_for_same_input() {
        let c = classifier();
        let html = article_page(3);
        let first = c.classify(Some(&html));
        for _ in 0..5 {
            assert_eq!(c.classify(Some(&html)), first);
        }
    }
}
