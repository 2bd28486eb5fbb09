use crate::{FetchError, TrackSource};
use async_trait::async_trait;
use nowplaying_sync_core::{now_millis, urls, TrackSnapshot, PLACEHOLDER_ARTWORK};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, PRAGMA};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const ARTWORK_PRIORITY: [&str; 4] = ["extralarge", "large", "medium", "small"];

/// Last.fm serves this grey star image when an album has no cover.
const LASTFM_BLANK_ARTWORK: &str = "2a96cbd8b46e442fc41c2b86b821562f";

#[derive(Debug, Deserialize)]
struct RecentTracksResponse {
    recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: OneOrMany<RawTrack>,
}

/// Older API revisions collapse a single-element list into an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::Many(items) => items.into_iter().next(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: RawArtist,
    #[serde(default)]
    album: RawText,
    #[serde(default)]
    image: Vec<RawImage>,
    #[serde(default)]
    url: String,
    #[serde(rename = "@attr", default)]
    attr: Option<RawAttr>,
}

#[derive(Debug, Default, Deserialize)]
struct RawArtist {
    name: Option<String>,
    #[serde(rename = "#text")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawText {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    size: String,
    #[serde(rename = "#text", default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawAttr {
    nowplaying: Option<String>,
}

pub struct LastFmSource {
    client: reqwest::Client,
    url: Url,
    user: String,
    timeout: Duration,
}

impl LastFmSource {
    pub fn new(
        endpoint: &str,
        user: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let url = Url::parse_with_params(
            endpoint,
            &[
                ("method", "user.getrecenttracks"),
                ("user", user),
                ("api_key", api_key),
                ("format", "json"),
                ("limit", "1"),
                ("extended", "1"),
            ],
        )
        .map_err(|err| FetchError::InvalidEndpoint(format!("{endpoint}: {err}")))?;

        let client = reqwest::Client::builder()
            .default_headers(no_cache_headers())
            .build()
            .map_err(|err| FetchError::Network(err.to_string()))?;

        Ok(Self {
            client,
            url,
            user: user.to_string(),
            timeout,
        })
    }

    async fn request(&self) -> Result<(u16, String), FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl TrackSource for LastFmSource {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    async fn fetch_latest(&mut self) -> Result<Option<TrackSnapshot>, FetchError> {
        debug!(user = %self.user, "requesting recent tracks");
        let budget_ms = self.timeout.as_millis() as u64;
        let (status, body) = tokio::time::timeout(self.timeout, self.request())
            .await
            .map_err(|_| FetchError::Timeout { budget_ms })??;

        if !(200..300).contains(&status) {
            let payload_error = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|value| source_error(&value));
            return Err(payload_error.unwrap_or(FetchError::Status(status)));
        }

        parse_recent_tracks(&body, now_millis())
    }
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn source_error(value: &serde_json::Value) -> Option<FetchError> {
    let code = value.get("error")?.as_i64()?;
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown source error")
        .to_string();
    Some(FetchError::Source { code, message })
}

/// Maps a `user.getrecenttracks` body to the most recent track.
pub(crate) fn parse_recent_tracks(
    body: &str,
    observed_at: u64,
) -> Result<Option<TrackSnapshot>, FetchError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|err| FetchError::Decode(err.to_string()))?;
    if let Some(err) = source_error(&value) {
        return Err(err);
    }

    let response: RecentTracksResponse =
        serde_json::from_value(value).map_err(|err| FetchError::Decode(err.to_string()))?;

    Ok(response
        .recenttracks
        .track
        .into_first()
        .map(|raw| to_snapshot(raw, observed_at)))
}

fn to_snapshot(raw: RawTrack, observed_at: u64) -> TrackSnapshot {
    let artist = raw.artist.name.or(raw.artist.text).unwrap_or_default();
    let is_playing = raw
        .attr
        .and_then(|a| a.nowplaying)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let artwork_url = select_artwork(&raw.image);
    let source_url = if !raw.url.trim().is_empty() {
        raw.url
    } else if !artist.is_empty() && !raw.name.is_empty() {
        urls::lastfm_track_url(&artist, &raw.name)
    } else {
        urls::lastfm_search_url(&artist, &raw.name)
    };

    TrackSnapshot {
        title: raw.name,
        artist,
        album: raw.album.text,
        artwork_url,
        is_playing,
        source_url,
        observed_at,
    }
}

fn usable_image(image: &RawImage) -> bool {
    !image.url.trim().is_empty() && !image.url.contains(LASTFM_BLANK_ARTWORK)
}

fn select_artwork(images: &[RawImage]) -> String {
    ARTWORK_PRIORITY
        .iter()
        .find_map(|size| {
            images
                .iter()
                .find(|image| image.size == *size && usable_image(image))
        })
        .or_else(|| images.iter().find(|image| usable_image(image)))
        .map(|image| image.url.clone())
        .unwrap_or_else(|| PLACEHOLDER_ARTWORK.to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_recent_tracks, LastFmSource};
    use crate::{FetchError, TrackSource};
    use nowplaying_sync_core::PLACEHOLDER_ARTWORK;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const NOW_PLAYING: &str = r##"{
        "recenttracks": {
            "track": [
                {
                    "artist": {"name": "Artist X", "url": "https://www.last.fm/music/Artist+X"},
                    "name": "Song A",
                    "album": {"#text": "Album One"},
                    "image": [
                        {"size": "small", "#text": "https://img.example/s.png"},
                        {"size": "medium", "#text": "https://img.example/m.png"},
                        {"size": "large", "#text": "https://img.example/l.png"},
                        {"size": "extralarge", "#text": "https://img.example/xl.png"}
                    ],
                    "url": "https://www.last.fm/music/Artist+X/_/Song+A",
                    "@attr": {"nowplaying": "true"}
                },
                {
                    "artist": {"name": "Artist Y"},
                    "name": "Older Song",
                    "album": {"#text": ""},
                    "image": [],
                    "url": "https://www.last.fm/music/Artist+Y/_/Older+Song",
                    "date": {"uts": "1700000000"}
                }
            ],
            "@attr": {"user": "listener", "page": "1", "perPage": "1"}
        }
    }"##;

    #[test]
    fn maps_now_playing_entry() {
        let track = parse_recent_tracks(NOW_PLAYING, 1_234)
            .unwrap()
            .expect("track");

        assert_eq!(track.title, "Song A");
        assert_eq!(track.artist, "Artist X");
        assert_eq!(track.album, "Album One");
        assert_eq!(track.artwork_url, "https://img.example/xl.png");
        assert!(track.is_playing);
        assert_eq!(track.source_url, "https://www.last.fm/music/Artist+X/_/Song+A");
        assert_eq!(track.observed_at, 1_234);
    }

    #[test]
    fn empty_track_list_is_not_an_error() {
        let body = r#"{"recenttracks": {"track": [], "@attr": {"user": "listener"}}}"#;
        assert_eq!(parse_recent_tracks(body, 0), Ok(None));
    }

    #[test]
    fn single_object_track_and_plain_artist_text() {
        let body = r##"{
            "recenttracks": {
                "track": {
                    "artist": {"#text": "Artist Z"},
                    "name": "Song C",
                    "album": {"#text": "B-Sides"},
                    "image": [
                        {"size": "extralarge", "#text": ""},
                        {"size": "large", "#text": ""},
                        {"size": "medium", "#text": "https://img.example/m.png"}
                    ],
                    "url": ""
                }
            }
        }"##;

        let track = parse_recent_tracks(body, 0).unwrap().expect("track");
        assert_eq!(track.artist, "Artist Z");
        assert!(!track.is_playing);
        assert_eq!(track.artwork_url, "https://img.example/m.png");
        assert_eq!(
            track.source_url,
            "https://www.last.fm/music/Artist%20Z/_/Song%20C"
        );
    }

    #[test]
    fn blank_star_artwork_falls_back_to_placeholder() {
        let body = r##"{
            "recenttracks": {
                "track": [{
                    "artist": {"name": "Artist X"},
                    "name": "Song A",
                    "image": [
                        {"size": "extralarge", "#text": "https://lastfm.freetls.fastly.net/i/u/300x300/2a96cbd8b46e442fc41c2b86b821562f.png"}
                    ]
                }]
            }
        }"##;

        let track = parse_recent_tracks(body, 0).unwrap().expect("track");
        assert_eq!(track.artwork_url, PLACEHOLDER_ARTWORK);
        assert_eq!(track.album, "");
    }

    #[test]
    fn error_payload_maps_to_source_error() {
        let body = r#"{"error": 10, "message": "Invalid API key - You must be granted a valid key by last.fm"}"#;
        match parse_recent_tracks(body, 0) {
            Err(FetchError::Source { code, message }) => {
                assert_eq!(code, 10);
                assert!(message.starts_with("Invalid API key"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        assert!(matches!(
            parse_recent_tracks("<html>busy</html>", 0),
            Err(FetchError::Decode(_))
        ));
    }

    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
        hold: Duration,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            tokio::time::sleep(hold).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/2.0/"), handle)
    }

    fn source(endpoint: &str, timeout: Duration) -> LastFmSource {
        LastFmSource::new(endpoint, "listener", "secret", timeout).unwrap()
    }

    #[tokio::test]
    async fn request_forbids_intermediary_caching() {
        let (endpoint, server) = serve_once("200 OK", NOW_PLAYING, Duration::ZERO).await;
        let mut lastfm = source(&endpoint, Duration::from_secs(5));

        let track = lastfm.fetch_latest().await.unwrap().expect("track");
        assert_eq!(track.title, "Song A");

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /2.0/?method=user.getrecenttracks"));
        assert!(request.contains("limit=1"));
        assert!(request.contains("extended=1"));
        assert!(request.contains("user=listener"));
        assert!(request.contains("cache-control: no-cache, no-store, must-revalidate"));
        assert!(request.contains("pragma: no-cache"));
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let (endpoint, _server) =
            serve_once("503 Service Unavailable", "", Duration::ZERO).await;
        let mut lastfm = source(&endpoint, Duration::from_secs(5));

        assert_eq!(lastfm.fetch_latest().await, Err(FetchError::Status(503)));
    }

    #[tokio::test]
    async fn forbidden_with_error_payload_is_source_error() {
        let (endpoint, _server) = serve_once(
            "403 Forbidden",
            r#"{"error": 10, "message": "Invalid API key"}"#,
            Duration::ZERO,
        )
        .await;
        let mut lastfm = source(&endpoint, Duration::from_secs(5));

        assert_eq!(
            lastfm.fetch_latest().await,
            Err(FetchError::Source {
                code: 10,
                message: "Invalid API key".to_string()
            })
        );
    }

    #[tokio::test]
    async fn slow_origin_hits_timeout_budget() {
        let (endpoint, _server) =
            serve_once("200 OK", NOW_PLAYING, Duration::from_secs(3)).await;
        let mut lastfm = source(&endpoint, Duration::from_millis(200));

        assert_eq!(
            lastfm.fetch_latest().await,
            Err(FetchError::Timeout { budget_ms: 200 })
        );
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut lastfm = source(&format!("http://{addr}/2.0/"), Duration::from_secs(5));
        assert!(matches!(
            lastfm.fetch_latest().await,
            Err(FetchError::Network(_))
        ));
    }
}
