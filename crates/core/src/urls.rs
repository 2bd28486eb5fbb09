use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Deep link used when a source entry carries no canonical track URL.
pub fn lastfm_track_url(artist: &str, title: &str) -> String {
    let artist = utf8_percent_encode(artist, NON_ALPHANUMERIC).to_string();
    let title = utf8_percent_encode(title, NON_ALPHANUMERIC).to_string();
    format!("https://www.last.fm/music/{artist}/_/{title}")
}

pub fn lastfm_search_url(artist: &str, title: &str) -> String {
    let q = format!("{} {}", artist, title);
    let encoded = utf8_percent_encode(q.trim(), NON_ALPHANUMERIC).to_string();
    format!("https://www.last.fm/search/tracks?q={encoded}")
}
