//! Listing-page traversal: load more tiles, extract job references.
//!
//! The listing renders a feed of job tiles that grows as the page scrolls.
//! [`load_more`] drives the scroll; [`extract_references`] parses a DOM
//! snapshot into [`JobReference`]s, dropping tiles the site has marked
//! visited and ids this process has already attempted. The site flags
//! visited tiles with several inconsistent conventions (class names, data
//! attributes, markers on ancestors), all of which are checked.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::browser::{DriverError, Pacing, PageDriver};
use crate::models::JobReference;

/// Tile lookups, tried in order; markup version decides which one matches.
const TILE_SELECTORS: &[&str] = &[
    "article[data-test=\"JobTile\"]",
    "div[data-test=\"JobTile\"]",
    "[data-test=\"job-tile\"]",
];

/// Attributes that carry the job id, tried in order on each tile.
const ID_ATTRIBUTES: &[&str] = &["data-ev-job-uid", "data-job-uid", "data-job-id"];

/// The tile's permalink anchor.
const TITLE_LINK_SELECTORS: &[&str] = &[
    "a[data-test=\"job-tile-title-link\"]",
    "a[data-test=\"job-tile-title-link UpLink\"]",
    ".job-tile-title a",
];

/// Permalink forms `/jobs/~<id>` and `/jobs/<slug>_~<id>`; used when a tile
/// exposes an href but no id attribute.
fn job_id_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"/jobs/~([A-Za-z0-9]+)").unwrap(),
            Regex::new(r"/jobs/[^_/]+_~([A-Za-z0-9]+)").unwrap(),
        ]
    })
}

/// Scrolls the listing until no more tiles load, then returns to the top.
/// Modal capture locates tiles by position, so the feed must end up at a
/// known origin.
pub async fn load_more(driver: &PageDriver, pacing: &Pacing) -> Result<(), DriverError> {
    driver.scroll_to_bottom_in_steps().await?;
    pacing.brief_pause().await;
    driver.scroll_to_top().await
}

/// Parses a listing snapshot into unprocessed job references, in DOM order.
///
/// A tile survives only if neither it, its ancestors, nor its title link
/// carry a visited marker, it yields both an id and an href, and the id is
/// not already in `processed`. Relative hrefs resolve against `base`.
pub fn extract_references(
    html: &str,
    base: &Url,
    processed: &HashSet<String>,
) -> Vec<JobReference> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for tile_selector in TILE_SELECTORS {
        let selector = match Selector::parse(tile_selector) {
            Ok(selector) => selector,
            Err(_) => continue,
        };
        let mut matched_any = false;
        for tile in doc.root_element().select(&selector) {
            matched_any = true;
            if is_visited(tile) {
                continue;
            }
            let Some(link) = title_link(tile) else {
                continue;
            };
            if is_visited(link) {
                continue;
            }
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(id) = tile_id(tile, href) else {
                debug!(href, "listing tile without a job id, skipping");
                continue;
            };
            if processed.contains(&id) || !seen.insert(id.clone()) {
                continue;
            }
            let href = match base.join(href) {
                Ok(resolved) => resolved.to_string(),
                Err(_) => href.to_string(),
            };
            references.push(JobReference::new(id, href));
        }
        // Alternates describe the same tiles under different markup
        // versions; the first selector that matches anything wins, filtered
        // or not.
        if matched_any {
            break;
        }
    }

    references
}

/// A tile's id attribute, falling back to the permalink patterns.
fn tile_id(tile: ElementRef<'_>, href: &str) -> Option<String> {
    for attribute in ID_ATTRIBUTES {
        if let Some(id) = tile.value().attr(attribute) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    job_id_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(href))
        .map(|captures| captures[1].to_string())
}

fn title_link(tile: ElementRef<'_>) -> Option<ElementRef<'_>> {
    TITLE_LINK_SELECTORS.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        tile.select(&selector).next()
    })
}

/// Whether the element or anything above it carries a visited marker.
fn is_visited(element: ElementRef<'_>) -> bool {
    if marked_visited(element) {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(marked_visited)
}

/// The site mixes conventions: named classes (`visited`, `air3-visited`,
/// `up-visited`, `job-tile-visited` and friends) and data attributes.
/// The substring check covers every class-name variant.
fn marked_visited(element: ElementRef<'_>) -> bool {
    let value = element.value();
    value.classes().any(|class| class.contains("visited"))
        || value.attr("data-visited") == Some("true")
        || value.attr("data-state") == Some("visited")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://jobs.example").unwrap()
    }

    fn extract(html: &str) -> Vec<JobReference> {
        extract_references(html, &base(), &HashSet::new())
    }

    const LISTING: &str = r#"
    <html><body><main>
      <article data-test="JobTile" data-ev-job-uid="~01aaa">
        <h3 class="job-tile-title"><a data-test="job-tile-title-link" href="/jobs/~01aaa">First job</a></h3>
      </article>
      <article data-test="JobTile" data-ev-job-uid="~01bbb" class="air3-visited">
        <h3><a data-test="job-tile-title-link" href="/jobs/~01bbb">Visited by class</a></h3>
      </article>
      <article data-test="JobTile" data-ev-job-uid="~01ccc" data-visited="true">
        <h3><a data-test="job-tile-title-link" href="/jobs/~01ccc">Visited by attribute</a></h3>
      </article>
      <article data-test="JobTile" data-ev-job-uid="~01ddd">
        <h3><a data-test="job-tile-title-link" class="up-visited" href="/jobs/~01ddd">Visited link</a></h3>
      </article>
      <div class="some-visited-wrapper">
        <article data-test="JobTile" data-ev-job-uid="~01eee">
          <h3><a data-test="job-tile-title-link" href="/jobs/~01eee">Visited ancestor</a></h3>
        </article>
      </div>
      <article data-test="JobTile" data-ev-job-uid="~01fff">
        <h3><a data-test="job-tile-title-link" href="/jobs/~01fff">Last job</a></h3>
      </article>
    </main></body></html>
    "#;

    #[test]
    fn keeps_unvisited_tiles_in_dom_order() {
        let refs = extract(LISTING);
        let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["~01aaa", "~01fff"]);
    }

    #[test]
    fn resolves_relative_hrefs_against_the_base() {
        let refs = extract(LISTING);
        assert_eq!(refs[0].href, "https://jobs.example/jobs/~01aaa");
    }

    #[test]
    fn drops_ids_already_processed() {
        let processed: HashSet<String> = ["~01aaa".to_string()].into();
        let refs = extract_references(LISTING, &base(), &processed);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "~01fff");
    }

    #[test]
    fn all_visited_snapshot_yields_nothing() {
        let html = r#"
        <article data-test="JobTile" data-ev-job-uid="~01aaa" class="visited">
          <a data-test="job-tile-title-link" href="/jobs/~01aaa">a</a>
        </article>
        <article data-test="JobTile" data-ev-job-uid="~01bbb" data-state="visited">
          <a data-test="job-tile-title-link" href="/jobs/~01bbb">b</a>
        </article>
        <article data-test="JobTile" data-ev-job-uid="~01ccc" class="job-tile-visited">
          <a data-test="job-tile-title-link" href="/jobs/~01ccc">c</a>
        </article>
        "#;
        assert!(extract(html).is_empty());
    }

    #[test]
    fn id_attribute_alternates_are_tried_in_order() {
        let html = r#"
        <article data-test="JobTile" data-job-uid="~01uid">
          <a data-test="job-tile-title-link" href="/jobs/~01uid">by uid</a>
        </article>
        <article data-test="JobTile" data-job-id="~01id">
          <a data-test="job-tile-title-link" href="/jobs/~01id">by id</a>
        </article>
        "#;
        let ids: Vec<String> = extract(html).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["~01uid", "~01id"]);
    }

    #[test]
    fn falls_back_to_permalink_patterns_for_the_id() {
        let html = r#"
        <article data-test="JobTile">
          <a data-test="job-tile-title-link" href="/jobs/~016ffa94b9fe0e50ab">bare</a>
        </article>
        <article data-test="JobTile">
          <a data-test="job-tile-title-link" href="/jobs/rust-scraper_~017abc">slugged</a>
        </article>
        <article data-test="JobTile">
          <a data-test="job-tile-title-link" href="/talent/profile">no id anywhere</a>
        </article>
        "#;
        let ids: Vec<String> = extract(html).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["016ffa94b9fe0e50ab", "017abc"]);
    }

    #[test]
    fn duplicate_tiles_collapse_to_one_reference() {
        let html = r#"
        <article data-test="JobTile" data-ev-job-uid="~01aaa">
          <a data-test="job-tile-title-link" href="/jobs/~01aaa">once</a>
        </article>
        <article data-test="JobTile" data-ev-job-uid="~01aaa">
          <a data-test="job-tile-title-link" href="/jobs/~01aaa">twice</a>
        </article>
        "#;
        assert_eq!(extract(html).len(), 1);
    }

    #[test]
    fn tile_without_link_is_skipped() {
        let html = r#"<article data-test="JobTile" data-ev-job-uid="~01aaa"><p>promo card</p></article>"#;
        assert!(extract(html).is_empty());
    }
}
