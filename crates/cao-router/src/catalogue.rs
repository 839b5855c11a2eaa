//! The multilingual routing pattern catalogue.
//!
//! Ordered most-specific to most-generic: direct addressing first, then
//! polite requests, then bare imperative delegation, language by language.
//! Each entry carries a reverse template so tests can reconstruct an
//! utterance from (assistant, task) and assert the round trip.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Intent family a pattern belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentFamily {
    DirectAddress,
    PoliteRequest,
    ImperativeDelegation,
}

/// One entry in the catalogue.
#[derive(Debug)]
pub struct RoutePattern {
    pub name: &'static str,
    pub language: &'static str,
    pub family: IntentFamily,
    pub regex: Regex,
    /// Template with `{assistant}` and `{task}` placeholders.
    pub reverse: &'static str,
}

// Assistant short names are ASCII; keeping the capture ASCII-only lets the
// surrounding CJK particles terminate it without ambiguity.
const NAME: &str = "[A-Za-z][A-Za-z0-9_-]*";

struct Spec {
    name: &'static str,
    language: &'static str,
    family: IntentFamily,
    pattern: &'static str,
    reverse: &'static str,
}

macro_rules! spec {
    ($name:literal, $language:literal, $family:ident, $pattern:literal, $reverse:literal) => {
        Spec {
            name: $name,
            language: $language,
            family: IntentFamily::$family,
            pattern: $pattern,
            reverse: $reverse,
        }
    };
}

const SPECS: &[Spec] = &[
    // -- Direct addressing ------------------------------------------------
    spec!(
        "direct-address",
        "*",
        DirectAddress,
        r"^(?P<assistant>@NAME@)\s*[,:，：]\s*(?P<task>.*)$",
        "{assistant}, {task}"
    ),
    // -- Polite requests --------------------------------------------------
    spec!(
        "polite-en",
        "en",
        PoliteRequest,
        r"^please\s+(?:use|ask|call)\s+(?P<assistant>@NAME@)\s+to\s+(?P<task>.+)$",
        "please use {assistant} to {task}"
    ),
    spec!(
        "polite-zh",
        "zh",
        PoliteRequest,
        r"^请(?:用|使用|调用|让)\s*(?P<assistant>@NAME@)\s*(?:帮我|帮忙|来|去)?(?P<task>.+)$",
        "请用{assistant}帮我{task}"
    ),
    spec!(
        "polite-ja",
        "ja",
        PoliteRequest,
        r"^(?P<assistant>@NAME@)\s*を使って\s*(?P<task>.+?)(?:してください)?$",
        "{assistant}を使って{task}してください"
    ),
    spec!(
        "polite-ko",
        "ko",
        PoliteRequest,
        r"^(?P<assistant>@NAME@)(?:으로|로|에게)\s*(?P<task>.+?)\s*해\s*주세요$",
        "{assistant}로 {task} 해주세요"
    ),
    spec!(
        "polite-de",
        "de",
        PoliteRequest,
        r"^bitte\s+(?:benutze|verwende|nutze)\s+(?P<assistant>@NAME@)\s+(?:für|um)\s+(?P<task>.+)$",
        "bitte benutze {assistant} für {task}"
    ),
    spec!(
        "polite-fr",
        "fr",
        PoliteRequest,
        r"^(?:veuillez|s'il\s+(?:te|vous)\s+pla[iî]t,?)\s+utilise[rz]?\s+(?P<assistant>@NAME@)\s+pour\s+(?P<task>.+)$",
        "veuillez utiliser {assistant} pour {task}"
    ),
    spec!(
        "polite-es",
        "es",
        PoliteRequest,
        r"^por\s+favor,?\s+(?:usa|utiliza)\s+(?P<assistant>@NAME@)\s+para\s+(?P<task>.+)$",
        "por favor usa {assistant} para {task}"
    ),
    spec!(
        "polite-it",
        "it",
        PoliteRequest,
        r"^per\s+favore,?\s+(?:usa|utilizza)\s+(?P<assistant>@NAME@)\s+per\s+(?P<task>.+)$",
        "per favore usa {assistant} per {task}"
    ),
    spec!(
        "polite-pt",
        "pt",
        PoliteRequest,
        r"^por\s+favor,?\s+(?:use|usa|utilize)\s+(?P<assistant>@NAME@)\s+para\s+(?P<task>.+)$",
        "por favor use {assistant} para {task}"
    ),
    spec!(
        "polite-ru",
        "ru",
        PoliteRequest,
        r"^пожалуйста,?\s+(?:используй(?:те)?|вызови(?:те)?)\s+(?P<assistant>@NAME@)\s+(?:чтобы|для)\s+(?P<task>.+)$",
        "пожалуйста, используй {assistant} чтобы {task}"
    ),
    spec!(
        "polite-ar",
        "ar",
        PoliteRequest,
        r"^من\s+فضلك\s+استخدم\s+(?P<assistant>@NAME@)\s+ل(?P<task>.+)$",
        "من فضلك استخدم {assistant} ل{task}"
    ),
    spec!(
        "polite-tr",
        "tr",
        PoliteRequest,
        r"^lütfen\s+(?P<assistant>@NAME@)\s+(?:kullanarak|ile)\s+(?P<task>.+)$",
        "lütfen {assistant} ile {task}"
    ),
    // -- Imperative delegation --------------------------------------------
    spec!(
        "imperative-en",
        "en",
        ImperativeDelegation,
        r"^(?:use|ask|call|tell|have)\s+(?P<assistant>@NAME@)\s+to\s+(?P<task>.+)$",
        "use {assistant} to {task}"
    ),
    spec!(
        "imperative-zh",
        "zh",
        ImperativeDelegation,
        r"^(?:用|使用|调用|让)\s*(?P<assistant>@NAME@)\s*(?:帮我|帮忙|来|去)?(?P<task>.+)$",
        "调用{assistant}来{task}"
    ),
    spec!(
        "imperative-ja",
        "ja",
        ImperativeDelegation,
        r"^(?P<assistant>@NAME@)\s*に\s*(?P<task>.+?)\s*を(?:頼んで|お願い)$",
        "{assistant}に{task}をお願い"
    ),
    spec!(
        "imperative-ko",
        "ko",
        ImperativeDelegation,
        r"^(?P<assistant>@NAME@)(?:으로|로)\s+(?P<task>.+?)\s*해\s*줘$",
        "{assistant}로 {task} 해줘"
    ),
    spec!(
        "imperative-de",
        "de",
        ImperativeDelegation,
        r"^(?:benutze|verwende|nutze)\s+(?P<assistant>@NAME@)\s+(?:für|um)\s+(?P<task>.+)$",
        "benutze {assistant} für {task}"
    ),
    spec!(
        "imperative-fr",
        "fr",
        ImperativeDelegation,
        r"^(?:utilise[rz]?|appelle|demande\s+à)\s+(?P<assistant>@NAME@)\s+pour\s+(?P<task>.+)$",
        "utilise {assistant} pour {task}"
    ),
    spec!(
        "imperative-es",
        "es",
        ImperativeDelegation,
        r"^(?:usa|utiliza|llama\s+a|p[ií]dele\s+a)\s+(?P<assistant>@NAME@)\s+(?:para|que)\s+(?P<task>.+)$",
        "usa {assistant} para {task}"
    ),
    spec!(
        "imperative-it",
        "it",
        ImperativeDelegation,
        r"^(?:usa|utilizza|chiama|chiedi\s+a)\s+(?P<assistant>@NAME@)\s+(?:per|di)\s+(?P<task>.+)$",
        "usa {assistant} per {task}"
    ),
    spec!(
        "imperative-pt",
        "pt",
        ImperativeDelegation,
        r"^(?:use|usa|utilize|chame|peça\s+ao)\s+(?P<assistant>@NAME@)\s+para\s+(?P<task>.+)$",
        "use {assistant} para {task}"
    ),
    spec!(
        "imperative-ru",
        "ru",
        ImperativeDelegation,
        r"^(?:используй(?:те)?|вызови(?:те)?|попроси(?:те)?)\s+(?P<assistant>@NAME@)\s+(?:чтобы|для)\s+(?P<task>.+)$",
        "используй {assistant} чтобы {task}"
    ),
    spec!(
        "imperative-ar",
        "ar",
        ImperativeDelegation,
        r"^استخدم\s+(?P<assistant>@NAME@)\s+ل(?P<task>.+)$",
        "استخدم {assistant} ل{task}"
    ),
    spec!(
        "imperative-tr",
        "tr",
        ImperativeDelegation,
        r"^(?P<assistant>@NAME@)\s+(?:kullanarak|ile)\s+(?P<task>.+?)(?:\s+yap)?$",
        "{assistant} ile {task}"
    ),
];

/// The compiled catalogue, in matching order.
pub fn catalogue() -> &'static [RoutePattern] {
    static CATALOGUE: OnceLock<Vec<RoutePattern>> = OnceLock::new();
    CATALOGUE.get_or_init(|| {
        SPECS
            .iter()
            .map(|spec| RoutePattern {
                name: spec.name,
                language: spec.language,
                family: spec.family,
                regex: RegexBuilder::new(&spec.pattern.replace("@NAME@", NAME))
                    .case_insensitive(true)
                    .build()
                    .unwrap_or_else(|e| panic!("catalogue pattern '{}': {e}", spec.name)),
                reverse: spec.reverse,
            })
            .collect()
    })
}

/// Reconstruct an utterance from a pattern's reverse template.
pub fn render(pattern_name: &str, assistant: &str, task: &str) -> Option<String> {
    catalogue()
        .iter()
        .find(|p| p.name == pattern_name)
        .map(|p| p.reverse.replace("{assistant}", assistant).replace("{task}", task))
}
