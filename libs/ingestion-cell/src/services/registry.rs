use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::models::FieldKind;

/// Builds the matcher for a `label: value` line (or `【label】value`). The
/// value runs to the end of the line or to a `/ ` separator.
pub fn label_pattern(labels: &[&str]) -> Result<Regex, regex::Error> {
    let alternatives: Vec<String> = labels.iter().map(|l| regex::escape(l)).collect();
    Regex::new(&format!(
        r"(?mi)(?:^|[\s/■□●・*【\[(])(?:{})(?:[】\])]\s*:?|\s*:)[ \t]*(.+?)[ \t]*(?:\s*/\s|$)",
        alternatives.join("|")
    ))
}

/// A booking site whose confirmation mails use a known set of labels.
#[derive(Debug)]
pub struct SiteProfile {
    pub key: String,
    pub display_name: String,
    pub domains: Vec<String>,
    labels: HashMap<FieldKind, Regex>,
}

impl SiteProfile {
    pub fn new(
        key: &str,
        display_name: &str,
        domains: &[&str],
        labels: &[(FieldKind, &[&str])],
    ) -> Result<Self, regex::Error> {
        let labels = labels
            .iter()
            .map(|(field, names)| Ok((*field, label_pattern(names)?)))
            .collect::<Result<HashMap<_, _>, regex::Error>>()?;

        Ok(Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            domains: domains.iter().map(|d| d.to_ascii_lowercase()).collect(),
            labels,
        })
    }

    /// First labelled value for `field`, if the site labels that field at all.
    pub fn labelled<'t>(&self, field: FieldKind, text: &'t str) -> Option<&'t str> {
        let pattern = self.labels.get(&field)?;
        pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .find(|v| !v.is_empty())
    }

    fn owns(&self, domain: &str) -> Option<&str> {
        self.domains
            .iter()
            .find(|d| domain == d.as_str() || domain.ends_with(&format!(".{}", d)))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum Strategy {
    Specific(Arc<SiteProfile>),
    Generic,
}

impl Strategy {
    pub fn name(&self) -> String {
        match self {
            Strategy::Specific(profile) => format!("specific({})", profile.key),
            Strategy::Generic => "generic".to_string(),
        }
    }

    pub fn site(&self) -> Option<&SiteProfile> {
        match self {
            Strategy::Specific(profile) => Some(profile),
            Strategy::Generic => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategySelection {
    pub strategy: Strategy,
    pub sender_domain: Option<String>,
    pub matched_domain: Option<String>,
}

/// Maps sender domains to site profiles. Lookup is pure; unknown senders get
/// the generic strategy.
#[derive(Debug, Default)]
pub struct ParserRegistry {
    profiles: Vec<Arc<SiteProfile>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtin_sites() -> Result<Self, regex::Error> {
        Ok(Self::empty()
            .register(epark()?)
            .register(shika_town()?)
            .register(haisha_yoyaku()?))
    }

    pub fn register(mut self, profile: SiteProfile) -> Self {
        self.profiles.push(Arc::new(profile));
        self
    }

    pub fn profiles(&self) -> impl Iterator<Item = &SiteProfile> {
        self.profiles.iter().map(|p| p.as_ref())
    }

    pub fn select(&self, sender: &str) -> StrategySelection {
        let sender_domain = sender_domain(sender);

        let matched = sender_domain.as_deref().and_then(|domain| {
            self.profiles
                .iter()
                .find_map(|profile| profile.owns(domain).map(|d| (profile.clone(), d.to_string())))
        });

        match matched {
            Some((profile, domain)) => StrategySelection {
                strategy: Strategy::Specific(profile),
                sender_domain,
                matched_domain: Some(domain),
            },
            None => StrategySelection {
                strategy: Strategy::Generic,
                sender_domain,
                matched_domain: None,
            },
        }
    }
}

/// Lower-cased domain of `addr@domain` or `Display Name <addr@domain>`.
pub fn sender_domain(sender: &str) -> Option<String> {
    let address = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(open), Some(close)) if open < close => &sender[open + 1..close],
        _ => sender,
    };
    let (_, domain) = address.trim().rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    (!domain.is_empty()).then_some(domain)
}

// ==============================================================================
// BUILT-IN SITES
// ==============================================================================

fn epark() -> Result<SiteProfile, regex::Error> {
    SiteProfile::new(
        "epark",
        "EPARK",
        &["epark.jp"],
        &[
            (FieldKind::Name, &["患者名", "お名前", "予約者名"]),
            (FieldKind::NameKana, &["フリガナ", "ふりがな"]),
            (FieldKind::Date, &["予約日時", "予約日", "来院日"]),
            (FieldKind::Time, &["予約時間", "予約時刻", "来院時間", "予約日時"]),
            (FieldKind::Treatment, &["診療内容", "診療メニュー", "メニュー"]),
            (FieldKind::Phone, &["電話番号", "TEL"]),
            (FieldKind::Email, &["メールアドレス"]),
            (FieldKind::BookingNumber, &["予約番号"]),
        ],
    )
}

fn shika_town() -> Result<SiteProfile, regex::Error> {
    SiteProfile::new(
        "shika_town",
        "歯科タウン",
        &["shika-town.com"],
        &[
            (FieldKind::Name, &["お名前", "患者様名", "患者名"]),
            (FieldKind::NameKana, &["フリガナ"]),
            (FieldKind::Date, &["ご予約日", "予約日"]),
            (FieldKind::Time, &["ご予約時間", "予約時間"]),
            (FieldKind::Treatment, &["ご相談内容", "診療内容"]),
            (FieldKind::Phone, &["ご連絡先", "電話番号"]),
            (FieldKind::Email, &["メール", "メールアドレス"]),
            (FieldKind::BookingNumber, &["受付番号"]),
        ],
    )
}

fn haisha_yoyaku() -> Result<SiteProfile, regex::Error> {
    SiteProfile::new(
        "haisha_yoyaku",
        "Haisha-Yoyaku",
        &["haisha-yoyaku.jp"],
        &[
            (FieldKind::Name, &["氏名", "患者名"]),
            (FieldKind::NameKana, &["カナ", "フリガナ"]),
            (FieldKind::Date, &["希望日", "予約日"]),
            (FieldKind::Time, &["希望時間", "予約時間"]),
            (FieldKind::Treatment, &["治療内容", "診療内容"]),
            (FieldKind::Phone, &["電話", "電話番号"]),
            (FieldKind::Email, &["E-mail", "メールアドレス"]),
            (FieldKind::BookingNumber, &["予約ID"]),
        ],
    )
}
