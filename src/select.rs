//! Device selector queries.
//!
//! A query is a sequence of bracket-delimited groups; whitespace outside
//! brackets is ignored. The first group adds devices to an initially empty
//! set, every following group filters the accumulated result. Within a
//! group, terms separated by `,` apply left to right, and a run of
//! `|`-separated terms forms a union that collapses at the next `,`.
//!
//! Terms:
//! - `id` — the device with that id
//! - `#N`, `#N-M` — channel, or inclusive channel range (swapped if N > M)
//! - `$key op value` — metadata predicate, `op ∈ {=, !=, *=, ^=, $=}`
//! - `@param op number f` — float parameter predicate,
//!   `op ∈ {<, <=, >, >=, !=, =}`
//! - a leading `!` inverts the term
//!
//! A malformed selector logs an error and yields whatever had been
//! accumulated before the failure; it never panics a running show.

use indexmap::IndexMap;
use tracing::error;

use crate::model::device::Device;
use crate::model::device_set::{DeviceSet, MetadataOp, NumOp};
use crate::model::float::FloatParam;
use crate::model::param::Param;

/// One parsed term, as a device predicate.
enum Term {
    Id { id: String, invert: bool },
    Channel { lower: u32, upper: u32, invert: bool },
    Metadata {
        key: String,
        op: MetadataOp,
        arg: String,
        eq: bool,
    },
    ParamFloat {
        param: String,
        op: NumOp,
        probe: FloatParam,
        eq: bool,
    },
}

impl Term {
    fn matches(&self, d: &Device) -> bool {
        match self {
            Term::Id { id, invert } => (d.id() == id) != *invert,
            Term::Channel {
                lower,
                upper,
                invert,
            } => ((*lower..=*upper).contains(&d.channel())) != *invert,
            Term::Metadata { key, op, arg, eq } => {
                // Lacking the key never matches, whatever the polarity.
                d.metadata(key).is_some_and(|v| op.matches(v, arg) == *eq)
            }
            Term::ParamFloat {
                param,
                op,
                probe,
                eq,
            } => d
                .param(param)
                .and_then(|p| p.compare(&Param::Float(probe.clone())))
                .is_some_and(|ord| op.matches(ord) == *eq),
        }
    }
}

/// Evaluates a selector against a device map.
pub fn select(devices: &IndexMap<String, Device>, query: &str) -> DeviceSet {
    let groups = match split_groups(query) {
        Ok(g) => g,
        Err(msg) => {
            error!("selector parse error: {msg} in {query:?}");
            return DeviceSet::new();
        }
    };

    let mut working = DeviceSet::new();
    let mut filter = false;

    for group in groups {
        let mut pending: Vec<DeviceSet> = Vec::new();
        for (text, consolidate) in split_terms(&group) {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let term = match parse_term(text) {
                Ok(t) => t,
                Err(msg) => {
                    error!("selector parse error: {msg} in {query:?}");
                    return working;
                }
            };

            let result = if filter {
                working.retain_where(devices, |d| term.matches(d))
            } else {
                working.add_where(devices, |d| term.matches(d))
            };

            if consolidate {
                let mut merged = result;
                for r in pending.drain(..) {
                    merged = merged.union(&r);
                }
                working = merged;
            } else {
                pending.push(result);
            }
        }
        filter = true;
    }

    working
}

/// Splits a query into groups: leading bare text, then each `[...]` body.
fn split_groups(query: &str) -> Result<Vec<String>, String> {
    let mut groups = Vec::new();
    let mut rest = query;

    if let Some(first) = rest.find('[') {
        let lead = rest.get(..first).unwrap_or_default().trim();
        if !lead.is_empty() {
            groups.push(lead.to_string());
        }
        rest = rest.get(first..).unwrap_or_default();
        while let Some(open) = rest.find('[') {
            let after = rest.get(open + 1..).unwrap_or_default();
            let Some(close) = after.find(']') else {
                return Err("no matching ] for [".to_string());
            };
            groups.push(after.get(..close).unwrap_or_default().to_string());
            rest = after.get(close + 1..).unwrap_or_default();
        }
    } else if !rest.trim().is_empty() {
        groups.push(rest.to_string());
    }

    Ok(groups)
}

/// Splits a group body into terms. The flag is true when the term ends an
/// OR run (terminated by `,` or the end of the group).
fn split_terms(group: &str) -> Vec<(String, bool)> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in group.chars() {
        match c {
            ',' => {
                out.push((std::mem::take(&mut current), true));
            }
            '|' => {
                out.push((std::mem::take(&mut current), false));
            }
            _ => current.push(c),
        }
    }
    out.push((current, true));
    out
}

fn parse_term(text: &str) -> Result<Term, String> {
    let (invert, body) = match text.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };

    match body.chars().next() {
        Some('#') => parse_channel_term(body.get(1..).unwrap_or_default(), invert),
        Some('$') => parse_metadata_term(body.get(1..).unwrap_or_default(), invert),
        Some('@') => parse_param_term(body.get(1..).unwrap_or_default(), invert),
        Some(_) => Ok(Term::Id {
            id: body.to_string(),
            invert,
        }),
        None => Err("empty term".to_string()),
    }
}

fn parse_channel_term(body: &str, invert: bool) -> Result<Term, String> {
    let body = body.trim();
    let (first, second) = match body.split_once('-') {
        Some((a, b)) => (a, Some(b)),
        None => (body, None),
    };
    let lower: u32 = first
        .trim()
        .parse()
        .map_err(|_| format!("invalid channel selector #{body}"))?;
    let upper = match second {
        Some(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("invalid channel selector #{body}"))?,
        None => lower,
    };
    // Swap flipped ranges rather than failing.
    let (lower, upper) = if lower > upper {
        (upper, lower)
    } else {
        (lower, upper)
    };
    Ok(Term::Channel {
        lower,
        upper,
        invert,
    })
}

fn parse_metadata_term(body: &str, invert: bool) -> Result<Term, String> {
    let key_end = body
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .ok_or_else(|| format!("invalid metadata selector ${body}"))?;
    let key = body.get(..key_end).unwrap_or_default();
    if key.is_empty() {
        return Err(format!("invalid metadata selector ${body}"));
    }
    let rest = body.get(key_end..).unwrap_or_default().trim_start();

    let mut eq = !invert;
    let (op, arg) = if let Some(a) = rest.strip_prefix("!=") {
        // `!=` flips the polarity; a leading `!` flips it back.
        eq = !eq;
        (MetadataOp::Equals, a)
    } else if let Some(a) = rest.strip_prefix("*=") {
        (MetadataOp::Contains, a)
    } else if let Some(a) = rest.strip_prefix("^=") {
        (MetadataOp::Prefix, a)
    } else if let Some(a) = rest.strip_prefix("$=") {
        (MetadataOp::Suffix, a)
    } else if let Some(a) = rest.strip_prefix('=') {
        (MetadataOp::Equals, a)
    } else {
        return Err(format!("invalid metadata selector ${body}"));
    };

    Ok(Term::Metadata {
        key: key.to_string(),
        op,
        arg: arg.trim().to_string(),
        eq,
    })
}

fn parse_param_term(body: &str, invert: bool) -> Result<Term, String> {
    let name_end = body
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .ok_or_else(|| format!("invalid parameter selector @{body}"))?;
    let param = body.get(..name_end).unwrap_or_default();
    if param.is_empty() {
        return Err(format!("invalid parameter selector @{body}"));
    }
    let rest = body.get(name_end..).unwrap_or_default().trim_start();

    let eq = !invert;
    let (op, rest, eq) = if let Some(r) = rest.strip_prefix("<=") {
        (NumOp::Le, r, eq)
    } else if let Some(r) = rest.strip_prefix(">=") {
        (NumOp::Ge, r, eq)
    } else if let Some(r) = rest.strip_prefix("!=") {
        (NumOp::Ne, r, eq)
    } else if let Some(r) = rest.strip_prefix('<') {
        (NumOp::Lt, r, eq)
    } else if let Some(r) = rest.strip_prefix('>') {
        (NumOp::Gt, r, eq)
    } else if let Some(r) = rest.strip_prefix('=') {
        (NumOp::Eq, r, eq)
    } else {
        return Err(format!("invalid parameter selector @{body}"));
    };

    let rest = rest.trim();
    let Some(num_text) = rest.strip_suffix('f') else {
        return Err(format!(
            "invalid parameter selector type in @{body} (only 'f' is supported)"
        ));
    };
    let val: f64 = num_text
        .trim()
        .parse()
        .map_err(|_| format!("invalid parameter selector number in @{body}"))?;

    Ok(Term::ParamFloat {
        param: param.to_string(),
        op,
        probe: FloatParam::new(val, val, f64::INFINITY, f64::NEG_INFINITY),
        eq,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn stage() -> IndexMap<String, Device> {
        let mut out = IndexMap::new();
        let specs = [
            ("front1", 1, "FOH", "R80", 0.8),
            ("front2", 2, "FOH", "R02", 0.2),
            ("back1", 3, "upstage", "R80", 0.0),
            ("back2", 4, "upstage", "L201", 1.0),
        ];
        for (id, ch, pos, gel, level) in specs {
            let mut d = Device::new(id, ch, "Par");
            d.set_param("intensity", Param::Float(FloatParam::unit(level)));
            d.set_metadata("position", pos);
            d.set_metadata("gel", gel);
            out.insert(id.to_string(), d);
        }
        out
    }

    fn ids(s: &DeviceSet) -> Vec<&str> {
        s.ids().collect()
    }

    #[test]
    fn bare_id_selects_one_device() {
        let devices = stage();
        assert_eq!(ids(&select(&devices, "front1")), vec!["front1"]);
    }

    #[test]
    fn comma_unions_in_first_group() {
        let devices = stage();
        let s = select(&devices, "[front1, back2]");
        assert_eq!(ids(&s), vec!["back2", "front1"]);
    }

    #[test]
    fn channel_and_ranges() {
        let devices = stage();
        assert_eq!(ids(&select(&devices, "#2")), vec!["front2"]);
        assert_eq!(
            ids(&select(&devices, "#1-3")),
            vec!["back1", "front1", "front2"]
        );
        // Flipped bounds swap.
        assert_eq!(
            ids(&select(&devices, "#3-1")),
            vec!["back1", "front1", "front2"]
        );
        // Inverted channel.
        assert_eq!(
            ids(&select(&devices, "!#2")),
            vec!["back1", "back2", "front1"]
        );
    }

    #[test]
    fn metadata_operators() {
        let devices = stage();
        assert_eq!(
            ids(&select(&devices, "$position=FOH")),
            vec!["front1", "front2"]
        );
        assert_eq!(
            ids(&select(&devices, "$gel^=R")),
            vec!["back1", "front1", "front2"]
        );
        assert_eq!(ids(&select(&devices, "$gel$=01")), vec!["back2"]);
        assert_eq!(
            ids(&select(&devices, "$gel*=8")),
            vec!["back1", "front1"]
        );
        assert_eq!(
            ids(&select(&devices, "$gel!=R80")),
            vec!["back2", "front2"]
        );
    }

    #[test]
    fn negated_inequality_cancels() {
        let devices = stage();
        // !$gel!=R80 reads "not (gel != R80)" i.e. gel == R80.
        assert_eq!(
            ids(&select(&devices, "!$gel!=R80")),
            vec!["back1", "front1"]
        );
    }

    #[test]
    fn device_lacking_key_never_matches_either_polarity() {
        let mut devices = stage();
        devices.get_mut("back2").unwrap().remove_metadata("gel");
        assert!(!select(&devices, "$gel!=R80").contains("back2"));
        assert!(!select(&devices, "$gel=R80").contains("back2"));
    }

    #[test]
    fn param_predicates_compare_typed_floats() {
        let devices = stage();
        assert_eq!(
            ids(&select(&devices, "@intensity>0.5f")),
            vec!["back2", "front1"]
        );
        assert_eq!(ids(&select(&devices, "@intensity=0.2f")), vec!["front2"]);
        assert_eq!(
            ids(&select(&devices, "@intensity<=0.2f")),
            vec!["back1", "front2"]
        );
    }

    #[test]
    fn later_groups_filter_earlier_results() {
        let devices = stage();
        let s = select(&devices, "[$gel=R80][$position=FOH]");
        assert_eq!(ids(&s), vec!["front1"]);
    }

    #[test]
    fn or_runs_collapse_within_group() {
        let devices = stage();
        // Filter group keeps FOH or channel-4 members of the R-gel set.
        let s = select(&devices, "[$gel^=R][$position=FOH|#4]");
        assert_eq!(ids(&s), vec!["front1", "front2"]);
    }

    #[test]
    fn whitespace_outside_brackets_is_ignored() {
        let devices = stage();
        let s = select(&devices, "  [ front1 , front2 ]  [ #1 ] ");
        assert_eq!(ids(&s), vec!["front1"]);
    }

    #[test]
    fn malformed_selector_returns_accumulated_set() {
        let devices = stage();
        // First group parses; the second is malformed.
        let s = select(&devices, "[front1][$position&FOH]");
        assert_eq!(ids(&s), vec!["front1"]);
        // Unclosed bracket yields nothing but does not panic.
        assert!(select(&devices, "[front1").is_empty());
        assert!(select(&devices, "#abc").is_empty());
    }

    #[test]
    fn empty_query_selects_nothing() {
        let devices = stage();
        assert!(select(&devices, "").is_empty());
        assert!(select(&devices, "   ").is_empty());
    }

    #[test]
    fn inverted_id_selects_complement() {
        let devices = stage();
        assert_eq!(
            ids(&select(&devices, "!front1")),
            vec!["back1", "back2", "front2"]
        );
    }
}
