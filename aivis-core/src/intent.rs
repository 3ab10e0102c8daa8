use crate::models::Intent;

/// Checked first: any hit makes the response transactional.
const TRANSACTIONAL: &[&str] = &[
    "sign up",
    "signup",
    "register",
    "deposit",
    "bonus",
    "promo code",
    "promo",
    "free bet",
    "odds",
    "parlay",
    "price",
    "pricing",
    "buy",
    "purchase",
    "discount",
    "coupon",
    "subscribe",
    "place a bet",
];

const NAVIGATIONAL: &[&str] = &[
    "official site",
    "official website",
    "login",
    "log in",
    "sign in",
    "visit",
    "download app",
    "download the app",
    "app store",
    "google play",
    "homepage",
    "contact us",
];

const INFORMATIONAL: &[&str] = &[
    "how to",
    "guide",
    "compare",
    "comparison",
    "review",
    "vs.",
    " vs ",
    "versus",
    "what is",
    "explained",
    "tips",
    "pros and cons",
];

/// Classify a response by ordered keyword lists:
/// transactional > navigational > informational > other.
pub fn classify_intent(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    let hit = |list: &[&str]| list.iter().any(|kw| lowered.contains(kw));

    if hit(TRANSACTIONAL) {
        Intent::Transactional
    } else if hit(NAVIGATIONAL) {
        Intent::Navigational
    } else if hit(INFORMATIONAL) {
        Intent::Informational
    } else {
        Intent::Other
    }
}
