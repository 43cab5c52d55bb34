//! Repeated identical tool call detection.
//!
//! A model that calls the same tool with byte-identical arguments several
//! times in a row within one assistant message is probably stuck. The
//! window is the last `threshold` tool parts of the message, including the
//! call being checked; parts whose input is not known yet are ignored.

use helm_core::messages::Part;

/// Default number of identical calls that trigger detection.
pub const DEFAULT_THRESHOLD: usize = 3;

/// Whether the trailing tool parts of `parts` form a loop.
///
/// `parts` are the current assistant message's parts in order, with the
/// newest call already recorded.
pub fn is_doom_loop(parts: &[Part], threshold: usize) -> bool {
    if threshold == 0 {
        return false;
    }
    let window: Vec<(&str, String)> = parts
        .iter()
        .rev()
        .filter_map(|p| {
            let (_, tool, state) = p.as_tool()?;
            let input = state.input()?;
            Some((tool, input.to_string()))
        })
        .take(threshold)
        .collect();
    if window.len() < threshold {
        return false;
    }
    let (first_tool, first_args) = &window[0];
    window
        .iter()
        .all(|(tool, args)| tool == first_tool && args == first_args)
}
