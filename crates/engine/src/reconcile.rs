use nowplaying_sync_core::TrackSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    TrackChanged,
    StateChanged,
    Cleared,
    Nothing,
}

pub fn compute_diff(previous: Option<&TrackSnapshot>, next: Option<&TrackSnapshot>) -> DiffKind {
    match (previous, next) {
        (None, None) => DiffKind::Nothing,
        (None, Some(_)) => DiffKind::TrackChanged,
        (Some(_), None) => DiffKind::Cleared,
        (Some(prev), Some(curr)) if prev.same_event(curr) => DiffKind::Nothing,
        (Some(prev), Some(curr)) if prev.title == curr.title && prev.artist == curr.artist => {
            DiffKind::StateChanged
        }
        (Some(_), Some(_)) => DiffKind::TrackChanged,
    }
}

/// Decides which snapshot to hold after a fetch.
///
/// The first observation always wins and an empty fetch clears the held
/// track. Otherwise `previous` is kept unless `next` is a different logical
/// event, so formatting noise in album or artwork never replaces it.
pub fn merge(previous: Option<TrackSnapshot>, next: Option<TrackSnapshot>) -> Option<TrackSnapshot> {
    match compute_diff(previous.as_ref(), next.as_ref()) {
        DiffKind::Nothing => previous,
        DiffKind::TrackChanged | DiffKind::StateChanged | DiffKind::Cleared => next,
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_diff, merge, DiffKind};
    use nowplaying_sync_core::TrackSnapshot;

    fn snapshot(title: &str, artist: &str, playing: bool) -> TrackSnapshot {
        TrackSnapshot {
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Album".to_string(),
            artwork_url: "https://img.example/a.png".to_string(),
            is_playing: playing,
            source_url: "https://example.com/track".to_string(),
            observed_at: 1,
        }
    }

    #[test]
    fn same_logical_event_keeps_previous() {
        let previous = snapshot("Song A", "Artist X", true);
        let mut next = previous.clone();
        next.album = "Album (Remastered)".to_string();
        next.artwork_url = "https://img.example/other.png".to_string();
        next.observed_at = 50_000;

        assert_eq!(
            merge(Some(previous.clone()), Some(next)),
            Some(previous)
        );
    }

    #[test]
    fn different_event_replaces_previous() {
        let previous = snapshot("Song A", "Artist X", true);
        let cases = [
            snapshot("Song B", "Artist X", true),
            snapshot("Song A", "Artist Y", true),
            snapshot("Song A", "Artist X", false),
        ];

        for next in cases {
            assert_eq!(merge(Some(previous.clone()), Some(next.clone())), Some(next));
        }
    }

    #[test]
    fn first_observation_always_wins() {
        let next = snapshot("Song A", "Artist X", false);
        assert_eq!(merge(None, Some(next.clone())), Some(next));
        assert_eq!(merge(None, None), None);
    }

    #[test]
    fn empty_fetch_clears_held_track() {
        assert_eq!(merge(Some(snapshot("Song A", "Artist X", true)), None), None);
    }

    #[test]
    fn diff_distinguishes_track_and_state_changes() {
        let playing = snapshot("Song A", "Artist X", true);
        let paused = snapshot("Song A", "Artist X", false);
        let other = snapshot("Song B", "Artist X", true);

        assert_eq!(compute_diff(Some(&playing), Some(&paused)), DiffKind::StateChanged);
        assert_eq!(compute_diff(Some(&playing), Some(&other)), DiffKind::TrackChanged);
        assert_eq!(compute_diff(Some(&playing), None), DiffKind::Cleared);
        assert_eq!(compute_diff(Some(&playing), Some(&playing)), DiffKind::Nothing);
    }
}
