//! Rule-based synthetic value generation
//!
//! Produces a fabricated value that keeps the shape of the original: digit
//! skeletons for numbers and IDs, valid calendar dates, plausible email
//! addresses, case-preserving letter substitution for names. Output is a
//! pure function of `(salt, entity_type, raw_text)`.

use std::sync::LazyLock;

use anon_core::entity::{
    DATE, DATE_TIME, DURATION_TIME, EMAIL_ADDRESS, IP_ADDRESS, MAC_ADDRESS, URL,
};
use anon_core::entity::{is_named_type, is_phone_type, is_skeleton_type};
use anon_core::ReplacementConfig;
use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Draws attempted before falling back to reversal
const MAX_REDRAWS: usize = 8;

/// Common given-name and surname characters used for CJK substitution
const NAME_POOL: &[char] = &[
    '王', '李', '張', '劉', '陳', '楊', '黃', '趙', '吳', '周', '林', '徐', '孫', '馬', '朱', '胡',
    '郭', '何', '高', '羅', '鄭', '梁', '謝', '宋', '唐', '許', '韓', '馮', '鄧', '曹', '彭', '曾',
    '明', '華', '偉', '芳', '娜', '敏', '靜', '麗', '強', '磊', '軍', '洋', '勇', '艷', '傑', '娟',
    '濤', '超', '秀', '霞', '平', '剛', '桂', '英', '文', '志', '建', '國', '宏', '佳', '怡', '婷',
];

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap());

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap());

static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5}|(?:[0-9A-Fa-f]{4}\.){2}[0-9A-Fa-f]{4})$")
        .unwrap()
});

static DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Deterministic, format-preserving fake value generator
#[derive(Debug, Clone)]
pub struct SyntheticValueGenerator {
    salt: String,
    min_year: i32,
    max_year: i32,
    email_domains: Vec<String>,
}

impl SyntheticValueGenerator {
    /// Create a generator from replacement settings. Without a configured
    /// salt a random one is drawn, so outputs differ between instances.
    pub fn new(config: &ReplacementConfig) -> Self {
        let salt = config.seed_salt.clone().unwrap_or_else(|| {
            let bytes: [u8; 16] = rand::thread_rng().gen();
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        });

        let (min_year, max_year) = if config.min_year <= config.max_year {
            (config.min_year, config.max_year)
        } else {
            (config.max_year, config.min_year)
        };

        let email_domains = if config.email_domains.is_empty() {
            ReplacementConfig::default().email_domains
        } else {
            config.email_domains.clone()
        };

        Self {
            salt,
            min_year,
            max_year,
            email_domains,
        }
    }

    /// Generator with default settings and a fixed salt
    pub fn with_salt(salt: impl Into<String>) -> Self {
        let config = ReplacementConfig {
            seed_salt: Some(salt.into()),
            ..ReplacementConfig::default()
        };
        Self::new(&config)
    }

    fn rng_for(&self, entity_type: &str, raw: &str) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(entity_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(raw.as_bytes());
        StdRng::from_seed(hasher.finalize().into())
    }

    /// Generate a replacement for `raw`. Non-empty input never maps to
    /// itself.
    pub fn generate(&self, entity_type: &str, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let mut rng = self.rng_for(entity_type, raw);
        for _ in 0..MAX_REDRAWS {
            let candidate = self.draw(entity_type, raw, &mut rng);
            if candidate != raw {
                return candidate;
            }
        }

        let reversed: String = raw.chars().rev().collect();
        if reversed != raw {
            return reversed;
        }

        bump_first_alphanumeric(raw)
    }

    fn draw(&self, entity_type: &str, raw: &str, rng: &mut StdRng) -> String {
        match entity_type {
            EMAIL_ADDRESS if EMAIL_RE.is_match(raw) => self.email(raw, rng),
            MAC_ADDRESS => hex_skeleton(raw, rng),
            IP_ADDRESS => match parse_ipv4(raw) {
                Some(_) => (0..4)
                    .map(|_| rng.gen_range(0..=255u8).to_string())
                    .collect::<Vec<_>>()
                    .join("."),
                None => digit_skeleton(raw, rng),
            },
            DATE_TIME | DATE => match parse_iso_date(raw) {
                Some(_) => self.date(rng),
                None => digit_skeleton(raw, rng),
            },
            DURATION_TIME => duration(raw, rng),
            URL => url(raw, rng),
            t if is_skeleton_type(t) || t == EMAIL_ADDRESS => digit_skeleton(raw, rng),
            t if is_named_type(t) => letter_substitution(raw, rng),
            _ if mostly_numeric(raw) => digit_skeleton(raw, rng),
            _ => letter_substitution(raw, rng),
        }
    }

    fn email(&self, raw: &str, rng: &mut StdRng) -> String {
        let (local, domain) = raw.split_once('@').unwrap_or((raw, ""));
        let local = letter_substitution(local, rng);

        let (label, tld) = domain.rsplit_once('.').unwrap_or((domain, "com"));
        let original = label.rsplit('.').next().unwrap_or(label).to_lowercase();
        let tld = if !tld.is_empty() && tld.chars().all(|c| c.is_ascii_alphabetic()) {
            tld
        } else {
            "com"
        };

        let start = rng.gen_range(0..self.email_domains.len());
        let domain = (0..self.email_domains.len())
            .map(|i| &self.email_domains[(start + i) % self.email_domains.len()])
            .find(|d| d.to_lowercase() != original)
            .map(String::as_str)
            .unwrap_or("example");

        format!("{local}@{domain}.{tld}")
    }

    fn date(&self, rng: &mut StdRng) -> String {
        let year = rng.gen_range(self.min_year..=self.max_year);
        let month = rng.gen_range(1..=12u32);
        let day = rng.gen_range(1..=days_in_month(year, month));
        format!("{year:04}-{month:02}-{day:02}")
    }

    /// Whether `candidate` satisfies the format contract of `entity_type`
    /// given the original `raw` value
    pub fn conforms(entity_type: &str, candidate: &str, raw: &str) -> bool {
        if candidate.is_empty() || candidate.contains(['\n', '\r']) {
            return false;
        }

        match entity_type {
            EMAIL_ADDRESS => EMAIL_RE.is_match(candidate),
            t if is_phone_type(t) => {
                candidate.chars().filter(char::is_ascii_digit).count() >= 7
                    && candidate
                        .chars()
                        .all(|c| c.is_ascii_digit() || " -+().".contains(c))
            }
            DATE_TIME | DATE if parse_iso_date(raw).is_some() => {
                parse_iso_date(candidate).is_some()
            }
            MAC_ADDRESS => MAC_RE.is_match(candidate),
            IP_ADDRESS => parse_ipv4(candidate).is_some(),
            t if is_skeleton_type(t) => same_skeleton(candidate, raw),
            _ => true,
        }
    }
}

// ============================================================================
// Shape-preserving primitives
// ============================================================================

/// Redraw every ASCII digit, keep everything else in place
fn digit_skeleton(raw: &str, rng: &mut StdRng) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_digit() {
                char::from(b'0' + rng.gen_range(0..10u8))
            } else {
                c
            }
        })
        .collect()
}

/// Redraw hex digits preserving letter case and separators
fn hex_skeleton(raw: &str, rng: &mut StdRng) -> String {
    let alphabet: &[u8] = if raw.chars().any(|c| c.is_ascii_lowercase()) {
        b"0123456789abcdef"
    } else {
        b"0123456789ABCDEF"
    };

    raw.chars()
        .map(|c| {
            if c.is_ascii_hexdigit() {
                char::from(alphabet[rng.gen_range(0..16)])
            } else {
                c
            }
        })
        .collect()
}

/// Substitute letters preserving case, digits with digits, CJK with name
/// characters; punctuation and whitespace stay
fn letter_substitution(raw: &str, rng: &mut StdRng) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_lowercase() {
                char::from(b'a' + rng.gen_range(0..26u8))
            } else if c.is_ascii_uppercase() {
                char::from(b'A' + rng.gen_range(0..26u8))
            } else if c.is_ascii_digit() {
                char::from(b'0' + rng.gen_range(0..10u8))
            } else if is_cjk(c) {
                NAME_POOL[rng.gen_range(0..NAME_POOL.len())]
            } else {
                c
            }
        })
        .collect()
}

/// Replace only the first number with a different value in 1..=20
fn duration(raw: &str, rng: &mut StdRng) -> String {
    let Some(mat) = DIGIT_RUN_RE.find(raw) else {
        return letter_substitution(raw, rng);
    };

    let original: Option<u32> = mat.as_str().parse().ok();
    let mut value = rng.gen_range(1..=20u32);
    if Some(value) == original {
        value = value % 20 + 1;
    }

    format!("{}{}{}", &raw[..mat.start()], value, &raw[mat.end()..])
}

/// Substitute host and path characters, keep the scheme
fn url(raw: &str, rng: &mut StdRng) -> String {
    match raw.find("://") {
        Some(idx) => {
            let (scheme, rest) = raw.split_at(idx + 3);
            format!("{scheme}{}", letter_substitution(rest, rng))
        }
        None => letter_substitution(raw, rng),
    }
}

fn bump_first_alphanumeric(raw: &str) -> String {
    let mut bumped = false;
    let out: String = raw
        .chars()
        .map(|c| {
            if bumped {
                return c;
            }
            let next = match c {
                '0'..='8' | 'a'..='y' | 'A'..='Y' => char::from(c as u8 + 1),
                '9' => '0',
                'z' => 'a',
                'Z' => 'A',
                c if is_cjk(c) => {
                    if c == NAME_POOL[0] {
                        NAME_POOL[1]
                    } else {
                        NAME_POOL[0]
                    }
                }
                c => return c,
            };
            bumped = true;
            next
        })
        .collect();

    if bumped {
        out
    } else {
        format!("{raw}0")
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

fn mostly_numeric(raw: &str) -> bool {
    let alnum = raw.chars().filter(|c| c.is_alphanumeric()).count();
    let digits = raw.chars().filter(char::is_ascii_digit).count();
    alnum > 0 && digits * 2 >= alnum
}

fn same_skeleton(candidate: &str, raw: &str) -> bool {
    candidate.chars().count() == raw.chars().count()
        && candidate
            .chars()
            .zip(raw.chars())
            .all(|(a, b)| a.is_ascii_digit() == b.is_ascii_digit())
}

fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    if !ISO_DATE_RE.is_match(raw) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_ipv4(raw: &str) -> Option<[u8; 4]> {
    let octets: Vec<u8> = raw
        .split('.')
        .map(|part| part.parse::<u8>().ok())
        .collect::<Option<Vec<_>>>()?;
    octets.try_into().ok()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };

    next.and_then(|d| d.pred_opt()).map(|d| d.day()).unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn generator() -> SyntheticValueGenerator {
        SyntheticValueGenerator::with_salt("test-salt")
    }

    #[test]
    fn test_deterministic_per_salt() {
        let a = generator().generate("PERSON", "王小明");
        let b = generator().generate("PERSON", "王小明");
        let c = SyntheticValueGenerator::with_salt("other").generate("PERSON", "王小明");

        assert_eq!(a, b);
        assert_eq!(a.chars().count(), 3);
        assert_ne!(a, c);
    }

    #[test]
    fn test_email_shape() {
        let fake = generator().generate("EMAIL_ADDRESS", "john.doe@gmail.com");
        assert!(SyntheticValueGenerator::conforms("EMAIL_ADDRESS", &fake, "john.doe@gmail.com"));
        assert_ne!(fake, "john.doe@gmail.com");
        assert!(!fake.ends_with("@gmail.com"));
        assert!(fake.ends_with(".com"));
        assert_eq!(fake.find('.'), Some(4));
    }

    #[test]
    fn test_email_numeric_tld_replaced() {
        let fake = generator().generate("EMAIL_ADDRESS", "ops@10.0.0.1");
        // Not an email shape: falls back to digit skeleton
        assert_eq!(fake.len(), "ops@10.0.0.1".len());
        assert!(fake.starts_with("ops@"));
    }

    #[test]
    fn test_phone_skeleton() {
        let raw = "0912-345-678";
        let fake = generator().generate("TW_PHONE_NUMBER", raw);
        assert_eq!(fake.len(), raw.len());
        assert_eq!(&fake[4..5], "-");
        assert_eq!(&fake[8..9], "-");
        assert!(SyntheticValueGenerator::conforms("TW_PHONE_NUMBER", &fake, raw));
    }

    #[test]
    fn test_id_keeps_letters() {
        let fake = generator().generate("TW_ID_NUMBER", "A123456789");
        assert!(fake.starts_with('A'));
        assert!(SyntheticValueGenerator::conforms("TW_ID_NUMBER", &fake, "A123456789"));
    }

    #[test]
    fn test_iso_date_in_range() {
        let fake = generator().generate("DATE_TIME", "2023-02-14");
        let date = parse_iso_date(&fake).unwrap();
        assert!((1950..=2010).contains(&date.year()));
    }

    #[test]
    fn test_non_iso_date_skeleton() {
        let fake = generator().generate("DATE_TIME", "14/02/2023");
        assert_eq!(fake.len(), 10);
        assert_eq!(&fake[2..3], "/");
    }

    #[test]
    fn test_duration_first_number_only() {
        let fake = generator().generate("DURATION_TIME", "5 years of experience");
        assert!(fake.ends_with(" years of experience"));
        let n: u32 = fake.split(' ').next().unwrap().parse().unwrap();
        assert!((1..=20).contains(&n));
        assert_ne!(n, 5);
    }

    #[test]
    fn test_mac_and_ip() {
        let mac = generator().generate("MAC_ADDRESS", "3C:22:FB:12:9A:01");
        assert!(SyntheticValueGenerator::conforms("MAC_ADDRESS", &mac, "3C:22:FB:12:9A:01"));
        assert!(!mac.chars().any(|c| c.is_ascii_lowercase()));

        let ip = generator().generate("IP_ADDRESS", "192.168.1.10");
        assert!(parse_ipv4(&ip).is_some());
    }

    #[test]
    fn test_url_keeps_scheme() {
        let fake = generator().generate("URL", "https://example.com/path");
        assert!(fake.starts_with("https://"));
        assert_eq!(fake.len(), "https://example.com/path".len());
    }

    #[test]
    fn test_case_preserving_names() {
        let fake = generator().generate("PERSON", "John Smith");
        let chars: Vec<char> = fake.chars().collect();
        assert!(chars[0].is_ascii_uppercase());
        assert!(chars[1].is_ascii_lowercase());
        assert_eq!(chars[4], ' ');
        assert!(chars[5].is_ascii_uppercase());
    }

    #[test]
    fn test_single_character_never_identity() {
        let g = generator();
        for raw in ["7", "a", "Z", "王", "-", "9"] {
            assert_ne!(g.generate("PERSON", raw), raw);
        }
    }

    #[test]
    fn test_bump() {
        assert_eq!(bump_first_alphanumeric("-9-"), "-0-");
        assert_eq!(bump_first_alphanumeric("z"), "a");
        assert_eq!(bump_first_alphanumeric("--"), "--0");
    }

    #[test]
    fn test_conforms_rejects() {
        assert!(!SyntheticValueGenerator::conforms("PERSON", "a\nb", "ab"));
        assert!(!SyntheticValueGenerator::conforms("EMAIL_ADDRESS", "not-an-email", "a@b.co"));
        assert!(!SyntheticValueGenerator::conforms("PHONE_NUMBER", "12345", "0912345678"));
        assert!(!SyntheticValueGenerator::conforms("DATE_TIME", "2023-13-40", "2023-02-14"));
        assert!(SyntheticValueGenerator::conforms("DATE_TIME", "next week", "tomorrow"));
        assert!(!SyntheticValueGenerator::conforms("US_SSN", "123-456-789", "123-45-6789"));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(1999, 2), 28);
        assert_eq!(days_in_month(1999, 12), 31);
    }

    proptest! {
        #[test]
        fn prop_generate_never_identity(
            entity_type in prop::sample::select(vec![
                "PERSON", "EMAIL_ADDRESS", "PHONE_NUMBER", "DATE_TIME", "MAC_ADDRESS",
                "DURATION_TIME", "URL", "TW_ID_NUMBER", "CUSTOM",
            ]),
            raw in "\\PC{1,24}",
        ) {
            let fake = generator().generate(entity_type, &raw);
            prop_assert_ne!(fake, raw);
        }
    }
}
