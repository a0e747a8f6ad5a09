//! Working memory: the active conversation window.
//!
//! An ordered FIFO bounded by both message count and token estimate.
//! On overflow, the oldest non-system blocks are evicted; the caller
//! archives them before the new message is considered current.

use hearthmind_core::memory::MemoryBlock;
use hearthmind_core::message::Role;
use std::collections::VecDeque;

/// The working tier.
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    blocks: VecDeque<MemoryBlock>,
    max_msgs: usize,
    max_tokens: usize,
}

impl WorkingMemory {
    pub fn new(max_msgs: usize, max_tokens: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            max_msgs: max_msgs.max(1),
            max_tokens,
        }
    }

    /// Append a block, evicting oldest non-system blocks until both bounds
    /// hold. Returns the evicted blocks in eviction order; the caller must
    /// archive them before treating the new message as current.
    #[must_use = "evicted blocks must be archived"]
    pub fn push(&mut self, block: MemoryBlock) -> Vec<MemoryBlock> {
        self.blocks.push_back(block);

        let mut evicted = Vec::new();
        while self.blocks.len() > self.max_msgs || self.token_est() > self.max_tokens {
            let Some(pos) = self
                .blocks
                .iter()
                .position(|b| b.role != Some(Role::System))
            else {
                break;
            };
            // Never evict the block just added.
            if pos == self.blocks.len() - 1 {
                break;
            }
            if let Some(old) = self.blocks.remove(pos) {
                evicted.push(old);
            }
        }
        evicted
    }

    /// Blocks in insertion order.
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.iter()
    }

    /// Current total token estimate.
    pub fn token_est(&self) -> usize {
        self.blocks.iter().map(|b| b.token_est).sum()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Remove everything, returning the drained blocks.
    pub fn drain(&mut self) -> Vec<MemoryBlock> {
        self.blocks.drain(..).collect()
    }

    /// Restore persisted blocks without triggering eviction bookkeeping.
    pub fn restore(&mut self, blocks: Vec<MemoryBlock>) {
        self.blocks = blocks.into();
    }

    /// Render the working tier for context assembly, trimmed from the
    /// oldest side to fit `budget` tokens. Each line costs its text
    /// estimate plus ~4 tokens of role/format overhead.
    pub fn render(&self, budget: usize) -> String {
        let mut kept: Vec<&MemoryBlock> = Vec::new();
        let mut used = 0;
        for block in self.blocks.iter().rev() {
            let cost = block.token_est + 4;
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(block);
        }
        kept.reverse();

        let mut out = String::from("## Conversation\n");
        for block in kept {
            let role = block
                .role
                .map(|r| r.to_string())
                .unwrap_or_else(|| "note".into());
            out.push_str(&format!("{role}: {}\n", block.text));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_core::memory::MemoryTier;

    fn msg(role: Role, text: &str) -> MemoryBlock {
        MemoryBlock::working(role, text)
    }

    #[test]
    fn bounded_by_message_count() {
        let mut wm = WorkingMemory::new(4, 10_000);
        let mut evicted = Vec::new();
        for i in 1..=6 {
            evicted.extend(wm.push(msg(Role::User, &format!("m{i}"))));
        }

        assert_eq!(wm.len(), 4);
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].text, "m1");
        assert_eq!(evicted[1].text, "m2");
        let texts: Vec<&str> = wm.blocks().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4", "m5", "m6"]);
    }

    #[test]
    fn bounded_by_tokens() {
        let mut wm = WorkingMemory::new(100, 10);
        let _ = wm.push(msg(Role::User, &"a".repeat(24))); // 6 tokens
        let evicted = wm.push(msg(Role::User, &"b".repeat(24))); // 6 tokens, over budget

        assert_eq!(evicted.len(), 1);
        assert!(evicted[0].text.starts_with('a'));
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn system_blocks_survive_eviction() {
        let mut wm = WorkingMemory::new(2, 10_000);
        let _ = wm.push(msg(Role::System, "rules"));
        let _ = wm.push(msg(Role::User, "u1"));
        let evicted = wm.push(msg(Role::User, "u2"));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].text, "u1");
        assert!(wm.blocks().any(|b| b.role == Some(Role::System)));
    }

    #[test]
    fn newest_block_is_never_evicted() {
        let mut wm = WorkingMemory::new(1, 1);
        let huge = msg(Role::User, &"x".repeat(400));
        let evicted = wm.push(huge);
        assert!(evicted.is_empty());
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn render_trims_oldest_first() {
        let mut wm = WorkingMemory::new(10, 10_000);
        let _ = wm.push(msg(Role::User, &"old ".repeat(20)));
        let _ = wm.push(msg(Role::Assistant, "recent"));

        let rendered = wm.render(10);
        assert!(rendered.contains("recent"));
        assert!(!rendered.contains("old"));
    }

    #[test]
    fn restore_preserves_order() {
        let mut wm = WorkingMemory::new(10, 10_000);
        wm.restore(vec![msg(Role::User, "a"), msg(Role::Assistant, "b")]);
        assert_eq!(wm.len(), 2);
        assert!(wm.blocks().all(|b| b.tier == MemoryTier::Working));
    }
}
