//! Word-level selection shared by the compression models.

/// Words of a text, with whether a line break preceded each one.
#[derive(Debug, Default)]
pub struct Words<'a> {
    pub items: Vec<&'a str>,
    pub breaks: Vec<bool>,
}

impl<'a> Words<'a> {
    pub fn split(text: &'a str) -> Self {
        let mut words = Self::default();
        for (n, line) in text.split('\n').enumerate() {
            let mut first = n > 0;
            for word in line.split_whitespace() {
                words.items.push(word);
                words.breaks.push(first);
                first = false;
            }
        }
        // a break before the first word carries nothing
        if let Some(b) = words.breaks.first_mut() {
            *b = false;
        }
        words
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Words containing any forced literal. `"\n"` is handled by [`Words::assemble`].
    pub fn forced(&self, force_tokens: &[String]) -> Vec<bool> {
        let literals: Vec<&str> =
            force_tokens.iter().map(String::as_str).filter(|t| !t.trim().is_empty()).collect();
        self.items.iter().map(|w| literals.iter().any(|t| w.contains(t))).collect()
    }

    /// Joins kept words with spaces, or a newline where the source had a line
    /// break between two kept words and `keep_newlines` is set.
    pub fn assemble(&self, keep: &[bool], keep_newlines: bool) -> String {
        let mut out = String::new();
        let mut pending_break = false;
        for (i, word) in self.items.iter().enumerate() {
            pending_break |= self.breaks[i];
            if !keep.get(i).copied().unwrap_or(false) {
                continue;
            }
            if !out.is_empty() {
                out.push(if keep_newlines && pending_break { '\n' } else { ' ' });
            }
            out.push_str(word);
            pending_break = false;
        }
        out
    }
}

/// Keeps the `ceil(rate * n)` highest-scoring words plus every forced word.
///
/// Ties rank the earlier word first, so the kept set only grows with `rate`.
pub fn keep_mask(scores: &[f32], rate: f32, forced: &[bool]) -> Vec<bool> {
    let n = scores.len();
    let rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 1.0 };
    let budget = ((rate * n as f32).ceil() as usize).min(n);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
    });
    let mut keep = vec![false; n];
    for &i in order.iter().take(budget) {
        keep[i] = true;
    }
    for (i, f) in forced.iter().enumerate().take(n) {
        if *f {
            keep[i] = true;
        }
    }
    keep
}

pub fn keeps_newlines(force_tokens: &[String]) -> bool {
    force_tokens.iter().any(|t| t == "\n")
}
