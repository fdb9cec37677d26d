use jam_core::{PlaylistSummary, PlaylistTarget};

/// The "which playlist do we record into" dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    Choice,
    CreateNew { name: String },
    ChooseExisting { query: String },
    Selected(PlaylistTarget),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    PickCreate { default_name: String },
    PickExisting { query: String },
    Search(String),
    Created(PlaylistSummary),
    Chose(PlaylistSummary),
    Back,
    Cancel,
}

impl DialogState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DialogState::Selected(_) | DialogState::Cancelled)
    }

    /// Transition table. Events that make no sense in the current state
    /// leave it unchanged.
    pub fn next(self, event: DialogEvent) -> DialogState {
        use DialogEvent as E;
        use DialogState as S;

        match (self, event) {
            (state, _) if state.is_terminal() => state,
            (_, E::Cancel) => S::Cancelled,

            (S::Choice, E::PickCreate { default_name }) => S::CreateNew { name: default_name },
            (S::Choice, E::PickExisting { query }) => S::ChooseExisting { query },

            (S::CreateNew { .. }, E::Created(playlist)) => S::Selected(playlist.target()),

            (S::ChooseExisting { .. }, E::Search(query)) => S::ChooseExisting {
                query: query.trim().to_string(),
            },
            (S::ChooseExisting { .. }, E::Chose(playlist)) => S::Selected(playlist.target()),

            (S::CreateNew { .. } | S::ChooseExisting { .. }, E::Back) => S::Choice,

            (state, _) => state,
        }
    }
}

/// Reads the answer to the first menu: `1`/`c` create, `2`/`e` existing.
pub fn parse_menu(input: &str, default_name: &str) -> Option<DialogEvent> {
    match input.trim().to_lowercase().as_str() {
        "1" | "c" | "create" => Some(DialogEvent::PickCreate {
            default_name: default_name.to_string(),
        }),
        "2" | "e" | "existing" => Some(DialogEvent::PickExisting {
            query: String::new(),
        }),
        "q" | "quit" => Some(DialogEvent::Cancel),
        _ => None,
    }
}

/// Reads an answer in the playlist list: a 1-based number, `/text` to
/// search, `b` to go back, `q` to cancel.
pub fn parse_selection(input: &str, shown: &[&PlaylistSummary]) -> Option<DialogEvent> {
    let input = input.trim();
    match input {
        "b" | "back" => return Some(DialogEvent::Back),
        "q" | "quit" => return Some(DialogEvent::Cancel),
        _ => {}
    }
    if let Some(query) = input.strip_prefix('/') {
        return Some(DialogEvent::Search(query.to_string()));
    }
    let index: usize = input.parse().ok()?;
    let playlist = shown.get(index.checked_sub(1)?)?;
    Some(DialogEvent::Chose((*playlist).clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(id: &str) -> PlaylistSummary {
        PlaylistSummary {
            id: id.to_string(),
            name: format!("Playlist {}", id),
            total_tracks: 1,
            is_public: true,
            is_collaborative: false,
            owner_name: "me".to_string(),
            web_url: format!("https://open.spotify.com/playlist/{}", id),
        }
    }

    #[test]
    fn test_create_path() {
        let state = DialogState::Choice
            .next(DialogEvent::PickCreate {
                default_name: "Jam [01-02-2025]".to_string(),
            });
        assert_eq!(
            state,
            DialogState::CreateNew {
                name: "Jam [01-02-2025]".to_string()
            }
        );
        assert_eq!(state.clone().next(DialogEvent::Back), DialogState::Choice);

        let state = state.next(DialogEvent::Created(playlist("p9")));
        assert_eq!(state, DialogState::Selected(playlist("p9").target()));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_choose_path_with_search_and_back() {
        let state = DialogState::Choice
            .next(DialogEvent::PickExisting {
                query: String::new(),
            })
            .next(DialogEvent::Search(" jam ".to_string()));
        assert_eq!(
            state,
            DialogState::ChooseExisting {
                query: "jam".to_string()
            }
        );

        assert_eq!(state.clone().next(DialogEvent::Back), DialogState::Choice);
        assert_eq!(
            state.next(DialogEvent::Chose(playlist("p1"))),
            DialogState::Selected(playlist("p1").target())
        );
    }

    #[test]
    fn test_invalid_events_are_ignored() {
        assert_eq!(
            DialogState::Choice.next(DialogEvent::Chose(playlist("p1"))),
            DialogState::Choice
        );
        let creating = DialogState::CreateNew {
            name: "x".to_string(),
        };
        assert_eq!(
            creating.clone().next(DialogEvent::Search("y".to_string())),
            creating
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert_eq!(
            DialogState::Cancelled.next(DialogEvent::Back),
            DialogState::Cancelled
        );
        let selected = DialogState::Selected(playlist("p1").target());
        assert_eq!(selected.clone().next(DialogEvent::Cancel), selected);
        assert_eq!(
            DialogState::ChooseExisting {
                query: String::new()
            }
            .next(DialogEvent::Cancel),
            DialogState::Cancelled
        );
    }

    #[test]
    fn test_parse_menu() {
        assert!(matches!(
            parse_menu(" 1 ", "Jam"),
            Some(DialogEvent::PickCreate { default_name }) if default_name == "Jam"
        ));
        assert!(matches!(
            parse_menu("E", "Jam"),
            Some(DialogEvent::PickExisting { .. })
        ));
        assert_eq!(parse_menu("q", "Jam"), Some(DialogEvent::Cancel));
        assert_eq!(parse_menu("maybe", "Jam"), None);
    }

    #[test]
    fn test_parse_selection() {
        let all = [playlist("a"), playlist("b")];
        let shown: Vec<&PlaylistSummary> = all.iter().collect();

        assert_eq!(
            parse_selection("2", &shown),
            Some(DialogEvent::Chose(playlist("b")))
        );
        assert_eq!(parse_selection("0", &shown), None);
        assert_eq!(parse_selection("3", &shown), None);
        assert_eq!(
            parse_selection("/road", &shown),
            Some(DialogEvent::Search("road".to_string()))
        );
        assert_eq!(parse_selection("b", &shown), Some(DialogEvent::Back));
        assert_eq!(parse_selection("q", &shown), Some(DialogEvent::Cancel));
    }
}
