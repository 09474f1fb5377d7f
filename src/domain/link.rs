use url::Url;

/// Whether the link points at an article hosted on Medium.
pub fn is_medium_url(link: &str) -> bool {
    let Ok(url) = Url::parse(link) else {
        return false;
    };

    match url.host_str() {
        Some(host) => {
            let host = host.to_ascii_lowercase();
            host == "medium.com" || host.ends_with(".medium.com")
        }
        None => false,
    }
}

/// Route Medium links through a reader mirror; other links are returned as-is.
pub fn mirror_medium_link(link: &str, mirror: &str) -> String {
    if is_medium_url(link) {
        format!("{}/{}", mirror.trim_end_matches('/'), link)
    } else {
        link.to_string()
    }
}
