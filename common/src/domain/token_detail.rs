use serde::{Deserialize, Serialize};

/// Usage accounting monoid threaded through every agent call and merged
/// whenever one agent's run embeds another's (e.g. the Architect's
/// create-relationship tool folding in the Janitor's own usage). Ported from
/// the source's `utils/tokens.py` percentage/merge semantics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenInputDetail {
    pub total: u64,
    pub uncached: u64,
    pub cached: u64,
    pub cache_percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenOutputDetail {
    pub total: u64,
    pub regular: u64,
    pub reasoning: u64,
    pub reasoning_percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenDetail {
    pub input: TokenInputDetail,
    pub output: TokenOutputDetail,
    pub grand_total: u64,
    pub effective_total: u64,
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

impl TokenDetail {
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Builds a single usage record from raw provider counters, recomputing
    /// the derived percentage fields rather than trusting callers to supply
    /// them.
    #[must_use]
    pub fn from_counts(input_tokens: u64, output_tokens: u64, cached_tokens: u64, reasoning_tokens: u64) -> Self {
        let uncached = input_tokens.saturating_sub(cached_tokens);
        let regular = output_tokens.saturating_sub(reasoning_tokens);
        let grand_total = input_tokens + output_tokens;

        Self {
            input: TokenInputDetail {
                total: input_tokens,
                uncached,
                cached: cached_tokens,
                cache_percentage: percentage(cached_tokens, input_tokens),
            },
            output: TokenOutputDetail {
                total: output_tokens,
                regular,
                reasoning: reasoning_tokens,
                reasoning_percentage: percentage(reasoning_tokens, output_tokens),
            },
            grand_total,
            effective_total: uncached + output_tokens,
        }
    }

    /// Sums a list of usage records and recomputes percentages over the
    /// combined totals, rather than averaging the per-record percentages.
    #[must_use]
    pub fn merge(details: &[Self]) -> Self {
        let mut input_total = 0u64;
        let mut input_cached = 0u64;
        let mut output_total = 0u64;
        let mut output_reasoning = 0u64;

        for d in details {
            input_total += d.input.total;
            input_cached += d.input.cached;
            output_total += d.output.total;
            output_reasoning += d.output.reasoning;
        }

        Self::from_counts(input_total, output_total, input_cached, output_reasoning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_recomputes_percentages_over_combined_totals() {
        let a = TokenDetail::from_counts(100, 50, 40, 10);
        let b = TokenDetail::from_counts(200, 100, 0, 0);

        let merged = TokenDetail::merge(&[a, b]);

        assert_eq!(merged.input.total, 300);
        assert_eq!(merged.input.cached, 40);
        assert_eq!(merged.output.total, 150);
        assert_eq!(merged.output.reasoning, 10);
        assert_eq!(merged.grand_total, 450);
        assert_eq!(merged.effective_total, merged.input.uncached + merged.output.total);
    }

    #[test]
    fn from_counts_zero_input_avoids_division_by_zero() {
        let d = TokenDetail::from_counts(0, 0, 0, 0);
        assert_eq!(d.input.cache_percentage, 0.0);
        assert_eq!(d.output.reasoning_percentage, 0.0);
    }
}
