//! Selector-string grammar and the [`Request`] value type.
//!
//! A selector such as `norad=25544@oem~3?2019-07-20` is parsed into a
//! [`Request`] describing which satellite to look up, from which data
//! source, and with which offset or date constraint. The grammar is
//! `<key>=<value>[@<src>][~[<count>]][(^|?)<date>]`; a leading token
//! without `key=` is a plain name.
//!
//! Parsing here is pure: alias substitution needs the database and lives in
//! [`crate::sat::SatStore::parse_selector`].

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};

/// Field of selection against the satellite registry and the TLE table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Name,
    CosparId,
    NoradId,
}

impl Selector {
    /// Accepts the short keys `norad` and `cospar` as well as the
    /// canonical column names.
    pub fn from_key(key: &str) -> Result<Self> {
        match key {
            "name" => Ok(Selector::Name),
            "cospar" | "cospar_id" => Ok(Selector::CosparId),
            "norad" | "norad_id" => Ok(Selector::NoradId),
            _ => Err(Error::Parse(format!("unknown selector '{key}'"))),
        }
    }

    /// Column name in the `tle` and `sat` tables.
    pub fn column(&self) -> &'static str {
        match self {
            Selector::Name => "name",
            Selector::CosparId => "cospar_id",
            Selector::NoradId => "norad_id",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Orbit data source: the TLE time series, the OEM/OPM file archive, or a
/// user-defined tag bound to an archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Tle,
    Oem,
    Opm,
    Tag(String),
}

impl Source {
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "tle" => Source::Tle,
            "oem" => Source::Oem,
            "opm" => Source::Opm,
            other => Source::Tag(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Source::Tle => "tle",
            Source::Oem => "oem",
            Source::Opm => "opm",
            Source::Tag(name) => name,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Date constraint on the search. `Before`/`After` are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
    Any,
    Before(NaiveDateTime),
    After(NaiveDateTime),
}

/// Caller-known fields taking precedence over the parsed text.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Selector and value are an inseparable pair.
    pub target: Option<(Selector, String)>,
    pub src: Option<Source>,
    pub offset: Option<usize>,
    pub limit: Option<Limit>,
}

/// A parsed selector string, ready for resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub selector: Selector,
    pub value: String,
    pub src: Source,
    /// 0 = most recent record, N = Nth-before-most-recent.
    pub offset: usize,
    pub limit: Limit,
}

impl Request {
    /// Parse a selector string, with `overrides` taking precedence over
    /// anything derived from the text and `default_src` filling in a
    /// missing `@src`.
    pub fn parse(text: &str, overrides: &Overrides, default_src: &Source) -> Result<Self> {
        let head_end = text
            .find(|c| matches!(c, '@' | '~' | '^' | '?'))
            .unwrap_or(text.len());
        let head = &text[..head_end];

        let (selector, value) = match &overrides.target {
            Some((selector, value)) => (*selector, value.clone()),
            None => match head.split_once('=') {
                Some((key, value)) => (Selector::from_key(key)?, value.to_string()),
                None => (Selector::Name, head.to_string()),
            },
        };

        let offset = match overrides.offset {
            Some(offset) => offset,
            None => parse_offset(&text[head_end..])?,
        };

        let src = match &overrides.src {
            Some(src) => src.clone(),
            None => parse_src(&text[head_end..]).unwrap_or_else(|| default_src.clone()),
        };

        let limit = match overrides.limit {
            Some(limit) => limit,
            None => parse_limit(&text[head_end..])?,
        };

        Ok(Request {
            selector,
            value,
            src,
            offset,
            limit,
        })
    }
}

/// The canonical form: repeated-tilde offsets collapse to `~N`, dates are
/// printed as `%Y-%m-%dT%H:%M:%S`. Re-parsing the output yields an
/// equivalent request.
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}@{}", self.selector, self.value, self.src)?;
        if self.offset > 0 {
            write!(f, "~{}", self.offset)?;
        }
        match self.limit {
            Limit::Any => Ok(()),
            Limit::After(date) => write!(f, "^{}", date.format("%Y-%m-%dT%H:%M:%S")),
            Limit::Before(date) => write!(f, "?{}", date.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// `~~` counts tildes; a single `~` followed by digits is an explicit count.
fn parse_offset(tail: &str) -> Result<usize> {
    let count = tail.matches('~').count();
    if count == 1 {
        let first = tail.find('~').unwrap_or(0);
        let digits: String = tail[first + 1..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if !digits.is_empty() {
            return digits
                .parse()
                .map_err(|_| Error::Parse(format!("offset '{digits}' out of range")));
        }
    }
    Ok(count)
}

fn parse_src(tail: &str) -> Option<Source> {
    let at = tail.find('@')?;
    let token: String = tail[at + 1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    if token.is_empty() {
        None
    } else {
        Some(Source::parse(&token))
    }
}

fn parse_limit(tail: &str) -> Result<Limit> {
    for (marker, after) in [('^', true), ('?', false)] {
        if let Some(pos) = tail.find(marker) {
            let token: String = tail[pos + marker.len_utf8()..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || matches!(c, '-' | 'T' | ':' | '.'))
                .collect();
            let date = parse_date(&token)?;
            return Ok(if after {
                Limit::After(date)
            } else {
                Limit::Before(date)
            });
        }
    }
    Ok(Limit::Any)
}

/// Parse a date-only token to midnight, falling back to a full date-time.
pub fn parse_date(text: &str) -> Result<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| Error::Parse(format!("unable to parse date '{text}'")))
}

/// Parse durations of the form `3d`, `4w`, `180s` or combined `1d12h`.
pub fn parse_timedelta(text: &str) -> Result<Duration> {
    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut seen_unit = false;

    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| Error::Parse(format!("unable to parse duration '{text}'")))?;
        total = total
            + match c {
                'w' => Duration::weeks(value),
                'd' => Duration::days(value),
                'h' => Duration::hours(value),
                'm' => Duration::minutes(value),
                's' => Duration::seconds(value),
                _ => return Err(Error::Parse(format!("unknown duration unit '{c}'"))),
            };
        digits.clear();
        seen_unit = true;
    }

    if !digits.is_empty() || !seen_unit {
        return Err(Error::Parse(format!("unable to parse duration '{text}'")));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Request {
        Request::parse(text, &Overrides::default(), &Source::Tle).unwrap()
    }

    #[test]
    fn bare_name() {
        let req = parse("ISS (ZARYA)");
        assert_eq!(req.selector, Selector::Name);
        assert_eq!(req.value, "ISS (ZARYA)");
        assert_eq!(req.src, Source::Tle);
        assert_eq!(req.offset, 0);
        assert_eq!(req.limit, Limit::Any);
    }

    #[test]
    fn explicit_fields() {
        let req = parse("norad=25544~3@oem");
        assert_eq!(req.selector, Selector::NoradId);
        assert_eq!(req.value, "25544");
        assert_eq!(req.offset, 3);
        assert_eq!(req.src, Source::Oem);
        assert_eq!(req.limit, Limit::Any);
    }

    #[test]
    fn tilde_counting() {
        assert_eq!(parse("ISS~").offset, 1);
        assert_eq!(parse("ISS~~").offset, 2);
        assert_eq!(parse("ISS~~~").offset, 3);
        assert_eq!(parse("ISS~25").offset, 25);
    }

    #[test]
    fn date_limits() {
        let req = parse("norad=25544?2019-02-27");
        assert_eq!(
            req.limit,
            Limit::Before(parse_date("2019-02-27").unwrap())
        );

        let req = parse("norad=25544^2019-02-27T12:00:00");
        assert_eq!(
            req.limit,
            Limit::After(parse_date("2019-02-27T12:00:00").unwrap())
        );

        let req = parse("ISS@tle?2018-12-25");
        assert_eq!(req.src, Source::Tle);
        assert_eq!(
            req.limit,
            Limit::Before(
                NaiveDate::from_ymd_opt(2018, 12, 25)
                    .unwrap()
                    .and_time(NaiveTime::MIN)
            )
        );
    }

    #[test]
    fn unknown_key_is_a_parse_error() {
        let err = Request::parse("norod=25544", &Overrides::default(), &Source::Tle);
        assert!(matches!(err, Err(Error::Parse(_))));
    }

    #[test]
    fn unknown_src_becomes_a_tag() {
        let req = parse("ISS@blessed");
        assert_eq!(req.src, Source::Tag("blessed".into()));
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = Overrides {
            src: Some(Source::Opm),
            ..Default::default()
        };
        let req = Request::parse("ISS@tle~2", &overrides, &Source::Tle).unwrap();
        assert_eq!(req.src, Source::Opm);
        assert_eq!(req.offset, 2);
    }

    #[test]
    fn display_round_trip() {
        for text in ["norad=25544@oem~3", "name=ISS@tle?2018-12-25", "cospar=1998-067A@opm~~"] {
            let req = parse(text);
            let round = parse(&req.to_string());
            assert_eq!(req, round);
        }
    }

    #[test]
    fn timedelta_forms() {
        assert_eq!(parse_timedelta("3d").unwrap(), Duration::days(3));
        assert_eq!(parse_timedelta("4w").unwrap(), Duration::weeks(4));
        assert_eq!(
            parse_timedelta("1d12h").unwrap(),
            Duration::days(1) + Duration::hours(12)
        );
        assert!(parse_timedelta("12").is_err());
        assert!(parse_timedelta("").is_err());
    }
}
