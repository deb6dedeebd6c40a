use url::Url;

use crate::error::Result;
use crate::models::normalize_site;

/// Normalizes an article link into the key articles are deduplicated by.
///
/// Query parameters not in `allowed_params` are dropped, along with the
/// fragment. When the link's host is not part of the target's registered
/// `site`, the host is replaced with that site.
pub fn canonical_link(link: &str, site: Option<&str>, allowed_params: &[String]) -> Result<String> {
    let mut url = Url::parse(link)?;

    if let Some(site) = site.filter(|s| !s.is_empty()) {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        if !host.contains(&site.to_lowercase()) {
            url.set_host(Some(site))?;
        }
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| allowed_params.iter().any(|p| p == key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);

    Ok(url.to_string())
}

/// Picks the redirected URL only when it stays on the same site as `link`.
pub fn prefer_final_url(link: &str, final_url: &str) -> String {
    let (from, to) = (normalize_site(link), normalize_site(final_url));
    if !from.is_empty() && to.contains(&from) {
        final_url.to_string()
    } else {
        link.to_string()
    }
}
