//! The line-oriented ingest dialect.
//!
//! Valid message formats are:
//!
//! - `<str:name>:<value>|<str:type>`
//! - `<str:name>:<value>|<str:type>|@<f64:rate>`
//! - `<str:name>:<value>|<str:type>|#<tag>,<tag>,...`
//!
//! with `@rate` and `#tags` accepted in either order. Types map to
//! families as `c`/`g`/`ms`/`h`/`s`. Tags are `key:value` pairs; a bare
//! tag keeps an empty value. The reserved tags `scope:local`,
//! `scope:global` and the bare markers `local`/`global` select the
//! sample's aggregation scope and are consumed rather than kept.
//!
//! Multiple samples may be sent in a single packet separated by
//! newlines. One bad line poisons the whole packet, mirroring how the
//! sender batched it.

use metric;
use metric::{Key, Sample, Scope, TagMap};
use std::str::FromStr;

/// Why a packet was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Syntax or numeric failure.
    Malformed,
    /// Well-formed frame naming a type we do not speak.
    UnknownType,
}

/// Parse every line of `source`, appending samples to `res`. `base_tags`
/// are the listener's configured tags; line tags win on conflict.
pub fn parse_statsd(
    source: &str,
    res: &mut Vec<Sample>,
    base_tags: &TagMap,
) -> Result<(), ParseError> {
    for line in source.lines() {
        if line.is_empty() {
            continue;
        }
        parse_line(line, res, base_tags)?;
    }
    if res.is_empty() {
        return Err(ParseError::Malformed);
    }
    Ok(())
}

fn parse_line(
    line: &str,
    res: &mut Vec<Sample>,
    base_tags: &TagMap,
) -> Result<(), ParseError> {
    let colon_idx = match line.find(':') {
        Some(idx) => idx,
        None => return Err(ParseError::Malformed),
    };
    let name = &line[..colon_idx];
    if name.is_empty() {
        return Err(ParseError::Malformed);
    }

    let mut segments = line[colon_idx + 1..].split('|');
    let value_txt = match segments.next() {
        Some(v) if !v.is_empty() => v,
        _ => return Err(ParseError::Malformed),
    };
    let kind = match segments.next() {
        Some("c") => metric::Kind::Counter,
        Some("g") => metric::Kind::Gauge,
        Some("ms") => metric::Kind::Timer,
        Some("h") => metric::Kind::Histogram,
        Some("s") => metric::Kind::Set,
        Some("") | None => return Err(ParseError::Malformed),
        Some(_) => return Err(ParseError::UnknownType),
    };

    let mut rate = 1.0;
    let mut tags = TagMap::default();
    let mut scope = Scope::default();
    for segment in segments {
        if segment.starts_with('@') {
            rate = match f64::from_str(&segment[1..]) {
                Ok(r) if r > 0.0 && r <= 1.0 => r,
                _ => return Err(ParseError::Malformed),
            };
        } else if segment.starts_with('#') {
            parse_tags(&segment[1..], &mut tags, &mut scope)?;
        } else {
            return Err(ParseError::Malformed);
        }
    }
    tags.merge(base_tags);

    let key = Key::tagged(name, kind, tags);
    let sample = match kind {
        metric::Kind::Set => Sample::text(key, value_txt),
        _ => {
            let value = match f64::from_str(value_txt) {
                Ok(v) => v,
                Err(_) => return Err(ParseError::Malformed),
            };
            Sample::number(key, value)
        }
    };
    res.push(sample.rate(rate).scope(scope));
    Ok(())
}

fn parse_tags(
    segment: &str,
    tags: &mut TagMap,
    scope: &mut Scope,
) -> Result<(), ParseError> {
    for pair in segment.split(',') {
        if pair.is_empty() {
            return Err(ParseError::Malformed);
        }
        match pair.find(':') {
            Some(idx) => {
                let key = &pair[..idx];
                let value = &pair[idx + 1..];
                if key == "scope" {
                    match value {
                        "local" => *scope = Scope::Local,
                        "global" => *scope = Scope::Global,
                        _ => return Err(ParseError::Malformed),
                    }
                } else {
                    tags.insert(key, value);
                }
            }
            None => match pair {
                "local" => *scope = Scope::Local,
                "global" => *scope = Scope::Global,
                bare => {
                    tags.insert(bare, "");
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use metric::{Kind, Scope, TagMap, Value};
    use super::*;

    fn parse_one(line: &str) -> Result<Vec<::metric::Sample>, ParseError> {
        let mut res = Vec::new();
        parse_statsd(line, &mut res, &TagMap::default()).map(|_| res)
    }

    #[test]
    fn counter_with_rate() {
        let samples = parse_one("page.views:1|c|@0.1").unwrap();
        assert_eq!(1, samples.len());
        let s = &samples[0];
        assert_eq!("page.views", s.key.name);
        assert_eq!(Kind::Counter, s.key.kind);
        assert_eq!(Some(1.0), s.number_value());
        assert_eq!(0.1, s.rate);
        assert_eq!(Scope::Mixed, s.scope);
    }

    #[test]
    fn every_type_code() {
        for &(code, kind) in &[
            ("c", Kind::Counter),
            ("g", Kind::Gauge),
            ("ms", Kind::Timer),
            ("h", Kind::Histogram),
        ] {
            let line = format!("m:2.5|{}", code);
            let samples = parse_one(&line).unwrap();
            assert_eq!(kind, samples[0].key.kind);
            assert_eq!(Some(2.5), samples[0].number_value());
        }
    }

    #[test]
    fn set_values_stay_textual() {
        let samples = parse_one("users.active:bob|s").unwrap();
        assert_eq!(Kind::Set, samples[0].key.kind);
        assert_eq!(Value::Text("bob".to_string()), samples[0].value);
    }

    #[test]
    fn tags_parse_sorted_and_scoped() {
        let samples = parse_one("api.lat:9|ms|#zone:b,scope:global,app:web").unwrap();
        let s = &samples[0];
        assert_eq!(Scope::Global, s.scope);
        assert_eq!(Some("b"), s.key.tags.get("zone"));
        assert_eq!(Some("web"), s.key.tags.get("app"));
        // the scope selector is consumed, not kept
        assert_eq!(None, s.key.tags.get("scope"));
    }

    #[test]
    fn bare_scope_markers() {
        let samples = parse_one("c1:1|c|#local").unwrap();
        assert_eq!(Scope::Local, samples[0].scope);
        let samples = parse_one("c2:1|c|#global,env:prod").unwrap();
        assert_eq!(Scope::Global, samples[0].scope);
        assert_eq!(Some("prod"), samples[0].key.tags.get("env"));
    }

    #[test]
    fn rate_and_tags_in_either_order() {
        let a = parse_one("m:1|c|@0.5|#env:x").unwrap();
        let b = parse_one("m:1|c|#env:x|@0.5").unwrap();
        assert_eq!(a[0].rate, b[0].rate);
        assert_eq!(a[0].key, b[0].key);
    }

    #[test]
    fn base_tags_fill_in_but_do_not_override() {
        let mut base = TagMap::default();
        base.insert("host", "h1");
        base.insert("env", "prod");
        let mut res = Vec::new();
        parse_statsd("m:1|c|#env:canary", &mut res, &base).unwrap();
        assert_eq!(Some("canary"), res[0].key.tags.get("env"));
        assert_eq!(Some("h1"), res[0].key.tags.get("host"));
    }

    #[test]
    fn multi_line_packets() {
        let samples = parse_one("a:1|c\nb:2|g\nc:3|ms").unwrap();
        assert_eq!(3, samples.len());
    }

    #[test]
    fn malformed_lines_poison_the_packet() {
        for bad in &[
            "",
            "no-colon",
            ":1|c",
            "name:|c",
            "name:1",
            "name:1|",
            "name:one|c",
            "name:1|c|@2.0",
            "name:1|c|@0",
            "name:1|c|junk",
            "a:1|c\nbroken",
        ] {
            assert_eq!(Err(ParseError::Malformed), parse_one(bad), "input {:?}", bad);
        }
    }

    #[test]
    fn unknown_type_is_its_own_error() {
        assert_eq!(Err(ParseError::UnknownType), parse_one("name:1|zz"));
    }
}
