use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use regex::{Captures, Regex};
use tracing::debug;

use appointment_cell::models::TreatmentType;
use shared_utils::{fold_width, normalize_email, normalize_phone, strip_honorific};

use crate::models::{
    Confidence, ExtractionFailure, ExtractionResult, FieldKind, FieldSource, ReservationIntent,
};
use crate::services::dates::{self, Meridiem, RelativeDay};
use crate::services::registry::{label_pattern, SiteProfile, Strategy};

const MIN_PHONE_DIGITS: usize = 10;
const SPECIFIC_REQUIRED: [FieldKind; 3] = [FieldKind::Name, FieldKind::Date, FieldKind::Time];

/// Greeting-line words that look like `XXX様` but are not a person.
const NOT_A_NAME: [&str; 6] = ["患者", "お客", "皆", "各位", "担当者", "ご担当者"];

/// Ordered from most to least specific; the first keyword found wins.
const TREATMENT_KEYWORDS: [(&str, TreatmentType); 27] = [
    ("インプラント", TreatmentType::Implant),
    ("implant", TreatmentType::Implant),
    ("ホワイトニング", TreatmentType::Whitening),
    ("whitening", TreatmentType::Whitening),
    ("矯正", TreatmentType::Orthodontics),
    ("orthodont", TreatmentType::Orthodontics),
    ("抜歯", TreatmentType::Extraction),
    ("親知らず", TreatmentType::Extraction),
    ("歯周", TreatmentType::PeriodontalTreatment),
    ("歯肉", TreatmentType::PeriodontalTreatment),
    ("入れ歯", TreatmentType::Denture),
    ("義歯", TreatmentType::Denture),
    ("denture", TreatmentType::Denture),
    ("虫歯", TreatmentType::CavityTreatment),
    ("むし歯", TreatmentType::CavityTreatment),
    ("う蝕", TreatmentType::CavityTreatment),
    ("cavity", TreatmentType::CavityTreatment),
    ("クリーニング", TreatmentType::Cleaning),
    ("歯石", TreatmentType::Cleaning),
    ("cleaning", TreatmentType::Cleaning),
    ("検診", TreatmentType::Checkup),
    ("健診", TreatmentType::Checkup),
    ("checkup", TreatmentType::Checkup),
    ("初診", TreatmentType::Consultation),
    ("相談", TreatmentType::Consultation),
    ("カウンセリング", TreatmentType::Consultation),
    ("consultation", TreatmentType::Consultation),
];

type Capture<T> = fn(&Captures<'_>, NaiveDate) -> Option<T>;

/// One entry of a field's ordered pattern list. A match whose capture cannot
/// be turned into a value (say, February 30th) does not count as a hit.
pub struct PatternRule<T> {
    pub name: &'static str,
    regex: Regex,
    capture: Capture<T>,
}

impl<T> PatternRule<T> {
    pub fn new(name: &'static str, pattern: &str, capture: Capture<T>) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
            capture,
        })
    }

    fn with_regex(name: &'static str, regex: Regex, capture: Capture<T>) -> Self {
        Self { name, regex, capture }
    }

    pub fn apply(&self, text: &str, anchor: NaiveDate) -> Option<T> {
        self.regex
            .captures_iter(text)
            .find_map(|caps| (self.capture)(&caps, anchor))
    }
}

/// First rule in the list that yields a value.
fn first_match<T>(rules: &[PatternRule<T>], text: &str, anchor: NaiveDate) -> Option<T> {
    rules.iter().find_map(|rule| {
        let value = rule.apply(text, anchor);
        if value.is_some() {
            debug!("Pattern {} matched", rule.name);
        }
        value
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonName {
    pub name: String,
    pub kana: Option<String>,
}

/// Pulls reservation fields out of free text.
///
/// Never fails on input: every field is either found or left `None`.
pub struct TextExtractor {
    date_rules: Vec<PatternRule<NaiveDate>>,
    time_rules: Vec<PatternRule<NaiveTime>>,
    time_range: PatternRule<(NaiveTime, NaiveTime)>,
    names: Vec<PatternRule<PersonName>>,
    kana: Vec<PatternRule<String>>,
    phones: Vec<PatternRule<String>>,
    emails: Vec<PatternRule<String>>,
    booking_numbers: Vec<PatternRule<String>>,
}

impl TextExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        const WEEKDAYS_EN: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";

        let date_rules: Vec<PatternRule<NaiveDate>> = vec![
            PatternRule::new("kanji_ymd", r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日", |c, _| {
                dates::ymd(num(c, 1)? as i32, num(c, 2)?, num(c, 3)?)
            })?,
            PatternRule::new("slash_ymd", r"(\d{4})/(\d{1,2})/(\d{1,2})", |c, _| {
                dates::ymd(num(c, 1)? as i32, num(c, 2)?, num(c, 3)?)
            })?,
            PatternRule::new("dash_ymd", r"(\d{4})-(\d{1,2})-(\d{1,2})", |c, _| {
                dates::ymd(num(c, 1)? as i32, num(c, 2)?, num(c, 3)?)
            })?,
            PatternRule::new("kanji_md", r"(\d{1,2})\s*月\s*(\d{1,2})\s*日", |c, anchor| {
                dates::infer_year(num(c, 1)?, num(c, 2)?, anchor)
            })?,
            PatternRule::new("slash_md", r"(?:^|[^\d/])(\d{1,2})/(\d{1,2})(?:[^\d/]|$)", |c, anchor| {
                dates::infer_year(num(c, 1)?, num(c, 2)?, anchor)
            })?,
            PatternRule::new("day_after_tomorrow", r"(?i)明後日|あさって|day\s+after\s+tomorrow", |_, anchor| {
                Some(dates::resolve_relative(RelativeDay::DayAfterTomorrow, anchor))
            })?,
            PatternRule::new("tomorrow", r"(?i)明日|あした|tomorrow", |_, anchor| {
                Some(dates::resolve_relative(RelativeDay::Tomorrow, anchor))
            })?,
            PatternRule::new("next_weekday_ja", r"来週\s*の?\s*([月火水木金土日])曜", |c, anchor| {
                let weekday = dates::weekday_ja(c.get(1)?.as_str())?;
                Some(dates::resolve_relative(RelativeDay::NextWeekday(weekday), anchor))
            })?,
            PatternRule::new("next_weekday_en", &format!(r"(?i)\bnext\s+({})\b", WEEKDAYS_EN), |c, anchor| {
                let weekday = dates::weekday_en(c.get(1)?.as_str())?;
                Some(dates::resolve_relative(RelativeDay::NextWeekday(weekday), anchor))
            })?,
            PatternRule::new("this_weekday_ja", r"(?:今週\s*の?\s*)?([月火水木金土日])曜", |c, anchor| {
                let weekday = dates::weekday_ja(c.get(1)?.as_str())?;
                Some(dates::resolve_relative(RelativeDay::ThisWeekday(weekday), anchor))
            })?,
            PatternRule::new("this_weekday_en", &format!(r"(?i)\bthis\s+({})\b", WEEKDAYS_EN), |c, anchor| {
                let weekday = dates::weekday_en(c.get(1)?.as_str())?;
                Some(dates::resolve_relative(RelativeDay::ThisWeekday(weekday), anchor))
            })?,
            PatternRule::new("today", r"(?i)今日|本日|\btoday\b", |_, anchor| {
                Some(dates::resolve_relative(RelativeDay::Today, anchor))
            })?,
        ];

        let time_rules: Vec<PatternRule<NaiveTime>> = vec![
            PatternRule::new(
                "meridiem_ja",
                r"(午前|午後)\s*(\d{1,2})\s*時\s*(?:(\d{1,2})\s*分|(半))?",
                |c, _| {
                    let meridiem = if &c[1] == "午前" { Meridiem::Am } else { Meridiem::Pm };
                    dates::to_24h(Some(meridiem), num(c, 2)?, minutes(c, 3, 4))
                },
            )?,
            PatternRule::new(
                "meridiem_en",
                r"(?i)(?:^|[^\d:])(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\b\.?",
                |c, _| {
                    let meridiem = if c[3].eq_ignore_ascii_case("a") { Meridiem::Am } else { Meridiem::Pm };
                    dates::to_24h(Some(meridiem), num(c, 1)?, num(c, 2).unwrap_or(0))
                },
            )?,
            PatternRule::new("colon", r"(?:^|[^\d:])(\d{1,2}):(\d{2})(?:[^\d]|$)", |c, _| {
                dates::to_24h(None, num(c, 1)?, num(c, 2)?)
            })?,
            PatternRule::new("kanji", r"(\d{1,2})\s*時\s*(?:(\d{1,2})\s*分|(半))?", |c, _| {
                dates::to_24h(None, num(c, 1)?, minutes(c, 2, 3))
            })?,
        ];

        let time_range: PatternRule<(NaiveTime, NaiveTime)> = PatternRule::new(
            "range",
            r"(\d{1,2}):(\d{2})\s*[~\-]\s*(\d{1,2}):(\d{2})",
            |c, _| {
                let start = dates::to_24h(None, num(c, 1)?, num(c, 2)?)?;
                let end = dates::to_24h(None, num(c, 3)?, num(c, 4)?)?;
                (end > start).then_some((start, end))
            },
        )?;

        let names: Vec<PatternRule<PersonName>> = vec![
            PatternRule::with_regex(
                "labelled_name",
                label_pattern(&["患者名", "お名前", "氏名", "予約者名", "名前", "Name"])?,
                |c, _| split_name(c.get(1)?.as_str()),
            ),
            PatternRule::new("greeting", r"(?m)^[ \t]*([^\s:、。,]{1,20}?)[ \t]*(?:様|さま)(?:[\s、,。]|$)", |c, _| {
                let candidate = c.get(1)?.as_str();
                if NOT_A_NAME.contains(&candidate) {
                    return None;
                }
                split_name(candidate)
            })?,
        ];

        let kana: Vec<PatternRule<String>> = vec![PatternRule::with_regex(
            "labelled_kana",
            label_pattern(&["フリガナ", "ふりがな", "カナ"])?,
            |c, _| clean_kana(c.get(1)?.as_str()),
        )];

        let phones: Vec<PatternRule<String>> = vec![
            PatternRule::new(
                "international",
                r"\+81[\s\-]?(?:\(0\))?[\s\-]?\d{1,4}[\s\-]?\d{1,4}[\s\-]?\d{3,4}",
                |c, _| valid_phone(c.get(0)?.as_str()),
            )?,
            PatternRule::new(
                "domestic",
                r"(?:^|[^\d])(\(?0\d{1,4}\)?[\s\-]?\d{1,4}[\s\-]?\d{3,4})(?:[^\d]|$)",
                |c, _| valid_phone(c.get(1)?.as_str()),
            )?,
        ];

        let emails: Vec<PatternRule<String>> = vec![PatternRule::new(
            "address",
            r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}",
            |c, _| Some(normalize_email(c.get(0)?.as_str())),
        )?];

        let booking_numbers: Vec<PatternRule<String>> = vec![PatternRule::new(
            "booking_number",
            r"(?i)(?:予約番号|受付番号|予約ID)\s*[】\]]?\s*:?\s*([A-Za-z0-9][A-Za-z0-9\-]*)",
            |c, _| Some(c.get(1)?.as_str().to_string()),
        )?];

        Ok(Self {
            date_rules,
            time_rules,
            time_range,
            names,
            kana,
            phones,
            emails,
            booking_numbers,
        })
    }

    /// Runs `strategy`, falling back to the generic pass once when a site
    /// strategy comes up short. The generic pass only fills gaps.
    pub fn extract(&self, body: &str, anchor: NaiveDate, strategy: &Strategy) -> ExtractionResult {
        let text = fold_width(body).replace("\r\n", "\n");

        let Some(profile) = strategy.site() else {
            let intent = self.extract_generic(&text, anchor);
            let provenance = tag(&intent, FieldSource::Generic);
            return finish(intent, provenance, Confidence::Low);
        };

        let mut intent = self.extract_specific(&text, profile, anchor);
        let mut provenance = tag(&intent, FieldSource::Specific(profile.key.clone()));

        let missing: Vec<FieldKind> = SPECIFIC_REQUIRED.into_iter().filter(|f| !intent.has(*f)).collect();
        if missing.is_empty() {
            return ExtractionResult {
                intent,
                provenance,
                confidence: Confidence::High,
                failure: None,
            };
        }

        debug!("Site strategy {} missing {:?}, falling back to generic", profile.key, missing);
        for field in intent.fill_from(self.extract_generic(&text, anchor)) {
            provenance.insert(field, FieldSource::Generic);
        }
        finish(intent, provenance, Confidence::Low)
    }

    /// Reads only the values the site labels, then parses each value with the
    /// same field rules the generic pass uses.
    fn extract_specific(&self, text: &str, profile: &SiteProfile, anchor: NaiveDate) -> ReservationIntent {
        let value = |field| profile.labelled(field, text);
        let mut intent = ReservationIntent::default();

        if let Some(person) = value(FieldKind::Name).and_then(split_name) {
            intent.name = Some(person.name);
            intent.name_kana = person.kana;
        }
        if let Some(kana) = value(FieldKind::NameKana).and_then(clean_kana) {
            intent.name_kana = Some(kana);
        }

        intent.date = value(FieldKind::Date).and_then(|v| first_match(&self.date_rules, v, anchor));
        if let Some(v) = value(FieldKind::Time) {
            (intent.time, intent.end_time) = self.times_in(v, anchor);
        }

        intent.treatment_type = value(FieldKind::Treatment).and_then(treatment_in);
        intent.phone = value(FieldKind::Phone).and_then(|v| first_match(&self.phones, v, anchor));
        intent.email = value(FieldKind::Email).and_then(|v| first_match(&self.emails, v, anchor));
        intent.site_booking_number = value(FieldKind::BookingNumber)
            .and_then(|v| v.split_whitespace().next())
            .map(str::to_string);

        intent
    }

    fn extract_generic(&self, text: &str, anchor: NaiveDate) -> ReservationIntent {
        let person = first_match(&self.names, text, anchor);
        let (time, end_time) = self.times_in(text, anchor);

        ReservationIntent {
            name_kana: first_match(&self.kana, text, anchor).or_else(|| person.as_ref().and_then(|p| p.kana.clone())),
            name: person.map(|p| p.name),
            email: first_match(&self.emails, text, anchor),
            phone: first_match(&self.phones, text, anchor),
            date: first_match(&self.date_rules, text, anchor),
            time,
            end_time,
            treatment_type: treatment_in(text),
            site_booking_number: first_match(&self.booking_numbers, text, anchor),
        }
    }

    /// Start time plus an end time when the text gives a `start~end` range
    /// beginning at that start.
    fn times_in(&self, text: &str, anchor: NaiveDate) -> (Option<NaiveTime>, Option<NaiveTime>) {
        let start = first_match(&self.time_rules, text, anchor);
        let end = self
            .time_range
            .apply(text, anchor)
            .filter(|(range_start, _)| Some(*range_start) == start)
            .map(|(_, end)| end);
        (start, end)
    }
}

fn tag(intent: &ReservationIntent, source: FieldSource) -> BTreeMap<FieldKind, FieldSource> {
    intent
        .present_fields()
        .into_iter()
        .map(|field| (field, source.clone()))
        .collect()
}

/// Applies the generic viability policy: (name or a contact address) and a date.
fn finish(
    intent: ReservationIntent,
    provenance: BTreeMap<FieldKind, FieldSource>,
    confidence: Confidence,
) -> ExtractionResult {
    let failure = if intent.is_empty() {
        Some(ExtractionFailure::UnrecognizedFormat)
    } else {
        let mut missing = Vec::new();
        if intent.name.is_none() && intent.email.is_none() && intent.phone.is_none() {
            missing.push(FieldKind::Name);
        }
        if intent.date.is_none() {
            missing.push(FieldKind::Date);
        }
        (!missing.is_empty()).then_some(ExtractionFailure::InsufficientData { missing })
    };

    ExtractionResult {
        intent,
        provenance,
        confidence,
        failure,
    }
}

fn num(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

/// Minutes from either an `M分` group or a `半` group; neither means `:00`.
fn minutes(caps: &Captures<'_>, minute_group: usize, half_group: usize) -> u32 {
    if caps.get(half_group).is_some() {
        30
    } else {
        num(caps, minute_group).unwrap_or(0)
    }
}

fn valid_phone(raw: &str) -> Option<String> {
    let digits = normalize_phone(raw);
    (digits.len() >= MIN_PHONE_DIGITS).then_some(digits)
}

/// `山田太郎 様` or `山田太郎(ヤマダタロウ)` into a name and optional reading.
fn split_name(raw: &str) -> Option<PersonName> {
    let (name_part, kana) = match raw.find('(') {
        Some(open) => {
            let inner = raw[open + 1..].split(')').next().unwrap_or_default();
            (&raw[..open], clean_kana(inner))
        }
        None => (raw, None),
    };

    let name = strip_honorific(name_part);
    if name.is_empty() {
        return None;
    }
    Some(PersonName { name, kana })
}

/// Accepts a reading written in kana only.
fn clean_kana(raw: &str) -> Option<String> {
    let kana = strip_honorific(raw);
    let is_kana = |c: char| matches!(c, '\u{3040}'..='\u{30FF}' | ' ');
    (!kana.is_empty() && kana.chars().all(is_kana)).then_some(kana)
}

fn treatment_in(text: &str) -> Option<TreatmentType> {
    let lowered = text.to_lowercase();
    TREATMENT_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, treatment)| *treatment)
}
