//! Parsing of raw `LIST` output.
//!
//! Line layout (Unix `ls -l` style and the DOS/IIS style) is left to `suppaftp`'s listing
//! parser; lines it rejects are skipped. Modification dates go through
//! [`normalize_listing_date`], which is the only place date text is interpreted.

use suppaftp::list::File;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub modified: Option<OffsetDateTime>,
}

impl ListEntry {
    /// `.` and `..` entries some servers include in listings.
    pub fn is_self_or_parent(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Parse one `LIST` line. `now` anchors year inference for recent Unix dates.
pub fn parse_list_line(line: &str, now: OffsetDateTime) -> Option<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let file = File::try_from(line).ok()?;
    if file.name().is_empty() {
        return None;
    }

    let dos = line.starts_with(|c: char| c.is_ascii_digit());
    let kind = if file.is_directory() {
        EntryKind::Directory
    } else if file.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    // DOS listings print `<DIR>` in place of a directory size.
    let size = (!(dos && kind == EntryKind::Directory)).then_some(file.size() as u64);

    Some(ListEntry {
        name: file.name().to_owned(),
        kind,
        size,
        modified: date_text(line, file.name(), dos)
            .and_then(|text| normalize_listing_date(&text, now)),
    })
}

/// The raw date column of a line already accepted by the listing parser.
///
/// DOS lines start with `MM-DD-YY HH:MM[AM|PM]`; Unix lines end with `Mon DD HH:MM|YYYY name`.
fn date_text(line: &str, name: &str, dos: bool) -> Option<String> {
    let mut tokens = line.split_whitespace();
    if dos {
        return Some(format!("{} {}", tokens.next()?, tokens.next()?));
    }

    let body = match line.rsplit_once(" -> ") {
        Some((link, _target)) if link.ends_with(name) => link,
        _ => line,
    };
    let head = body.strip_suffix(name)?;
    let fields: Vec<&str> = head.split_whitespace().collect();
    let date = fields.get(fields.len().checked_sub(3)?..)?;
    Some(date.join(" "))
}

/// Normalize the date text of a listing line to UTC.
///
/// Formats are tried in this order; the first one that matches wins:
///
/// 1. RFC 3659 `YYYYMMDDHHMMSS[.sss]`
/// 2. ISO-like `YYYY-MM-DD HH:MM[:SS]`
/// 3. Unix, older than six months: `Mon DD YYYY` (midnight)
/// 4. Unix, recent: `Mon DD HH:MM`. The year is `now`'s year, or the previous one when that would
///    put the date more than a day into the future.
/// 5. DOS: `MM-DD-YY[YY] HH:MM[AM|PM]`. Two-digit years below 70 are 20xx.
///
/// Text matching none of these yields `None`; dates are never guessed.
pub fn normalize_listing_date(text: &str, now: OffsetDateTime) -> Option<OffsetDateTime> {
    let text = text.trim();
    parse_rfc3659(text)
        .or_else(|| parse_iso_like(text))
        .or_else(|| parse_unix_date(text, now))
        .or_else(|| parse_dos_date(text))
        .map(PrimitiveDateTime::assume_utc)
}

fn parse_rfc3659(text: &str) -> Option<PrimitiveDateTime> {
    let digits = text.split('.').next()?;
    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = |r: std::ops::Range<usize>| digits[r].parse::<u32>().ok();
    let date = calendar_date(n(0..4)? as i32, n(4..6)?, n(6..8)?)?;
    let time = Time::from_hms(n(8..10)? as u8, n(10..12)? as u8, n(12..14)? as u8).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

fn parse_iso_like(text: &str) -> Option<PrimitiveDateTime> {
    let (date, time) = text.split_once([' ', 'T'])?;
    let mut parts = date.split('-');
    let year = parts.next()?;
    if year.len() != 4 {
        return None;
    }
    let date = calendar_date(
        year.parse().ok()?,
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
    )?;
    if parts.next().is_some() {
        return None;
    }
    Some(PrimitiveDateTime::new(date, parse_clock(time)?))
}

fn parse_unix_date(text: &str, now: OffsetDateTime) -> Option<PrimitiveDateTime> {
    let mut parts = text.split_whitespace();
    let month = parse_month(parts.next()?)?;
    let day: u8 = parts.next()?.parse().ok()?;
    let last = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if last.contains(':') {
        let time = parse_clock(last)?;
        let this_year = Date::from_calendar_date(now.year(), month, day).ok();
        let candidate = this_year.map(|d| PrimitiveDateTime::new(d, time));
        let limit = now + time::Duration::days(1);
        match candidate {
            Some(dt) if dt.assume_utc() <= limit => Some(dt),
            _ => Date::from_calendar_date(now.year() - 1, month, day)
                .ok()
                .map(|d| PrimitiveDateTime::new(d, time)),
        }
    } else {
        if last.len() != 4 {
            return None;
        }
        let date = Date::from_calendar_date(last.parse().ok()?, month, day).ok()?;
        Some(PrimitiveDateTime::new(date, Time::MIDNIGHT))
    }
}

fn parse_dos_date(text: &str) -> Option<PrimitiveDateTime> {
    let (date, time) = text.split_once(' ')?;
    let mut parts = date.split('-');
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let year_text = parts.next()?;
    let year: i32 = match year_text.len() {
        2 => {
            let yy: i32 = year_text.parse().ok()?;
            if yy < 70 {
                2000 + yy
            } else {
                1900 + yy
            }
        }
        4 => year_text.parse().ok()?,
        _ => return None,
    };
    let date = calendar_date(year, month, day)?;

    let time = time.trim();
    let upper = time.to_ascii_uppercase();
    let (clock, meridiem) = if let Some(c) = upper.strip_suffix("AM") {
        (c.trim(), Some(false))
    } else if let Some(c) = upper.strip_suffix("PM") {
        (c.trim(), Some(true))
    } else {
        (upper.as_str(), None)
    };
    let (h, m) = clock.split_once(':')?;
    let mut hour: u8 = h.parse().ok()?;
    let minute: u8 = m.parse().ok()?;
    if let Some(pm) = meridiem {
        if hour == 0 || hour > 12 {
            return None;
        }
        hour %= 12;
        if pm {
            hour += 12;
        }
    }
    let time = Time::from_hms(hour, minute, 0).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

fn calendar_date(year: i32, month: u32, day: u32) -> Option<Date> {
    let month = Month::try_from(u8::try_from(month).ok()?).ok()?;
    Date::from_calendar_date(year, month, u8::try_from(day).ok()?).ok()
}

fn parse_clock(text: &str) -> Option<Time> {
    let mut parts = text.split(':');
    let hour: u8 = parts.next()?.parse().ok()?;
    let minute: u8 = parts.next()?.parse().ok()?;
    let second: u8 = match parts.next() {
        Some(s) => s.split('.').next()?.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Time::from_hms(hour, minute, second).ok()
}

fn parse_month(text: &str) -> Option<Month> {
    const MONTHS: [(&str, Month); 12] = [
        ("jan", Month::January),
        ("feb", Month::February),
        ("mar", Month::March),
        ("apr", Month::April),
        ("may", Month::May),
        ("jun", Month::June),
        ("jul", Month::July),
        ("aug", Month::August),
        ("sep", Month::September),
        ("oct", Month::October),
        ("nov", Month::November),
        ("dec", Month::December),
    ];
    if text.len() != 3 {
        return None;
    }
    MONTHS
        .iter()
        .find(|(abbr, _)| text.eq_ignore_ascii_case(abbr))
        .map(|(_, month)| *month)
}
