//! Stale-view registry. Mutation handlers mark the listing path (and on
//! update, the detail path) of the entity they touched; the shell polls
//! `views.changes` with its last cursor and refreshes what came back.

pub struct ViewCache {
    next_seq: u64,
    stale: Vec<StaleView>,
}

struct StaleView {
    seq: u64,
    path: String,
}

impl ViewCache {
    pub fn new() -> Self {
        ViewCache {
            next_seq: 1,
            stale: Vec::new(),
        }
    }

    pub fn invalidate(&mut self, path: &str) {
        // One entry per path; re-invalidation moves it to the newest seq.
        self.stale.retain(|v| v.path != path);
        self.stale.push(StaleView {
            seq: self.next_seq,
            path: path.to_string(),
        });
        self.next_seq += 1;
    }

    /// Paths invalidated after `cursor`, plus the cursor to hand back next
    /// time.
    pub fn changes_since(&self, cursor: u64) -> (u64, Vec<String>) {
        let paths = self
            .stale
            .iter()
            .filter(|v| v.seq > cursor)
            .map(|v| v.path.clone())
            .collect();
        (self.next_seq - 1, paths)
    }
}
