use std::collections::BTreeSet;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    Selected(Option<String>),
    Collapsed { path: String, collapsed: bool },
    Search(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&ViewChange)>;

/// Observable UI state shared by the graph and any surrounding panels.
#[derive(Default)]
pub struct ViewState {
    selected: Option<String>,
    collapsed: BTreeSet<String>,
    search: String,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn collapsed(&self) -> &BTreeSet<String> {
        &self.collapsed
    }

    pub fn is_collapsed(&self, path: &str) -> bool {
        self.collapsed.contains(path)
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&ViewChange) + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(s, _)| *s != id);
        self.subscribers.len() != before
    }

    pub fn select(&mut self, path: Option<String>) {
        if self.selected == path {
            return;
        }
        debug!(?path, "selection changed");
        self.selected = path.clone();
        self.notify(ViewChange::Selected(path));
    }

    pub fn set_collapsed(&mut self, path: &str, collapsed: bool) {
        let changed = if collapsed {
            self.collapsed.insert(path.to_string())
        } else {
            self.collapsed.remove(path)
        };
        if changed {
            self.notify(ViewChange::Collapsed {
                path: path.to_string(),
                collapsed,
            });
        }
    }

    /// Flip the collapse flag and return the new value.
    pub fn toggle_collapsed(&mut self, path: &str) -> bool {
        let collapsed = !self.is_collapsed(path);
        self.set_collapsed(path, collapsed);
        collapsed
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        let query = query.into();
        if self.search == query {
            return;
        }
        self.search = query.clone();
        self.notify(ViewChange::Search(query));
    }

    /// Case-insensitive substring match on a queue name. An empty query
    /// matches nothing.
    pub fn matches_search(&self, name: &str) -> bool {
        let query = self.search.trim();
        !query.is_empty() && name.to_lowercase().contains(&query.to_lowercase())
    }

    fn notify(&mut self, change: ViewChange) {
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_changes_are_published_once() {
        let mut state = ViewState::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = state.subscribe(move |c| sink.borrow_mut().push(c.clone()));

        state.select(Some("root.a".into()));
        state.select(Some("root.a".into()));
        assert!(state.toggle_collapsed("root.b"));
        state.set_collapsed("root.b", true);
        state.set_search("Prod");
        assert_eq!(
            *seen.borrow(),
            vec![
                ViewChange::Selected(Some("root.a".into())),
                ViewChange::Collapsed {
                    path: "root.b".into(),
                    collapsed: true
                },
                ViewChange::Search("Prod".into()),
            ]
        );

        assert!(state.unsubscribe(id));
        state.select(None);
        assert_eq!(seen.borrow().len(), 3);
        assert_eq!(state.selected(), None);
    }

    #[test]
    fn test_search_matching() {
        let mut state = ViewState::new();
        assert!(!state.matches_search("production"));
        state.set_search(" PROD ");
        assert!(state.matches_search("production"));
        assert!(!state.matches_search("default"));
    }
}
