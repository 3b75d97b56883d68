//! The billed unit. One food per started 100 non-whitespace characters;
//! provider token counts are recorded elsewhere and never billed.

/// Fixed allowance for wire framing and role scaffolding around the prompt.
pub const INPUT_OVERHEAD_CHARS: usize = 100;

pub fn nonspace_chars(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

pub fn food_estimate(s: &str) -> i64 {
    food_from_chars(nonspace_chars(s))
}

/// Pre-flight estimate over everything the caller is about to send.
pub fn estimated_input_food(system_prompt: &str, message: &str) -> i64 {
    food_from_chars(nonspace_chars(system_prompt) + nonspace_chars(message) + INPUT_OVERHEAD_CHARS)
}

fn food_from_chars(count: usize) -> i64 {
    ((count + 99) / 100) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_does_not_count() {
        assert_eq!(nonspace_chars("a b\tc\nd"), 4);
        assert_eq!(food_estimate("   \n\t  "), 0);
    }

    #[test]
    fn food_rounds_up_per_started_hundred() {
        assert_eq!(food_estimate(""), 0);
        assert_eq!(food_estimate(&"x".repeat(1)), 1);
        assert_eq!(food_estimate(&"x".repeat(100)), 1);
        assert_eq!(food_estimate(&"x".repeat(101)), 2);
        assert_eq!(food_estimate(&"x".repeat(250)), 3);
    }

    #[test]
    fn input_estimate_includes_the_overhead() {
        // 50 + 30 + 100 = 180 chars, two food.
        assert_eq!(estimated_input_food(&"s".repeat(50), &"m".repeat(30)), 2);
        // Empty prompt and message still cost the overhead food.
        assert_eq!(estimated_input_food("", ""), 1);
    }
}
