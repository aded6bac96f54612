//! Supported target languages.
//!
//! Each language is a variant of a closed enum carrying a fixed
//! [`LanguageProfile`]: voices, marker strings, the dialogue-line pattern,
//! seed content and the language-specific guidance spliced into prompts.
//! Supporting a new language means adding a variant and its profile.

use crate::curriculum::{DialogueLine, UnitDefinition, VocabularyItem};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr, sync::LazyLock};

/// The language all lessons are explained in.
pub const NATIVE_LANGUAGE_CODE: &str = "en";
pub const NATIVE_LANGUAGE_NAME: &str = "English";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Spanish,
    French,
    German,
    Italian,
}

/// A starter word shipped with the profile.
#[derive(Debug, Clone, Copy)]
pub struct SeedWord {
    pub target: &'static str,
    pub native: &'static str,
    pub word_type: &'static str,
    pub pronunciation: Option<&'static str>,
}

/// Static per-language configuration.
#[derive(Debug)]
pub struct LanguageProfile {
    /// ISO 639-1 code passed to the speech backend.
    pub code: &'static str,
    pub name: &'static str,
    /// Voice used when a speaker role has no mapping.
    pub default_voice: &'static str,
    /// Voice for native-language narration.
    pub narrator_voice: &'static str,
    /// Speaker role -> voice id.
    pub voices: &'static [(&'static str, &'static str)],
    /// Character names for `speaker_a` and `speaker_b`, given to the lesson prompt.
    pub speaker_names: [&'static str; 2],
    /// Spoken at the end of a lesson when the model forgot to close it.
    pub farewell: &'static str,
    /// Matches one `Speaker: line` entry of a multi-line dialogue segment.
    pub dialogue_pattern: &'static str,
    pub seed_title: &'static str,
    pub seed_vocabulary: &'static [SeedWord],
    pub seed_dialogue: &'static [(&'static str, &'static str, &'static str)],
    /// Appended to the lesson system prompt.
    pub prompt_guidance: &'static str,
}

const SPANISH: LanguageProfile = LanguageProfile {
    code: "es",
    name: "Spanish",
    default_voice: "nova",
    narrator_voice: "alloy",
    voices: &[
        ("narrator", "alloy"),
        ("teacher", "nova"),
        ("speaker_a", "shimmer"),
        ("speaker_b", "onyx"),
        ("maría", "shimmer"),
        ("carlos", "onyx"),
    ],
    speaker_names: ["María", "Carlos"],
    farewell: "¡Muy bien! Hasta la próxima.",
    dialogue_pattern: r"^\s*(?:—\s*)?(?P<speaker>[\p{L}][\p{L} .'_-]{0,23}?)\s*:\s*(?P<line>\S.*)$",
    seed_title: "Saludos",
    seed_vocabulary: &[
        SeedWord { target: "hola", native: "hello", word_type: "interjection", pronunciation: Some("OH-lah") },
        SeedWord { target: "adiós", native: "goodbye", word_type: "interjection", pronunciation: Some("ah-DYOHS") },
        SeedWord { target: "gracias", native: "thank you", word_type: "interjection", pronunciation: Some("GRAH-syahs") },
        SeedWord { target: "por favor", native: "please", word_type: "phrase", pronunciation: Some("por fah-VOR") },
        SeedWord { target: "sí", native: "yes", word_type: "adverb", pronunciation: Some("see") },
        SeedWord { target: "no", native: "no", word_type: "adverb", pronunciation: Some("noh") },
    ],
    seed_dialogue: &[
        ("speaker_a", "¡Hola! ¿Qué tal?", "Hi! How are you?"),
        ("speaker_b", "Bien, gracias. ¿Y tú?", "Good, thanks. And you?"),
        ("speaker_a", "Muy bien. ¡Adiós!", "Very well. Goodbye!"),
    ],
    prompt_guidance: "Stress falls on the penultimate syllable unless marked. Break words into syllables for backward build-up (e.g. gra-cias: cias, gracias).",
};

const FRENCH: LanguageProfile = LanguageProfile {
    code: "fr",
    name: "French",
    default_voice: "shimmer",
    narrator_voice: "alloy",
    voices: &[
        ("narrator", "alloy"),
        ("teacher", "shimmer"),
        ("speaker_a", "nova"),
        ("speaker_b", "echo"),
        ("claire", "nova"),
        ("julien", "echo"),
    ],
    speaker_names: ["Claire", "Julien"],
    farewell: "Très bien ! À la prochaine.",
    dialogue_pattern: r"^\s*(?:[—–-]\s*)?(?P<speaker>[\p{L}][\p{L} .'_-]{0,23}?)\s*:\s*(?P<line>\S.*)$",
    seed_title: "Bonjour",
    seed_vocabulary: &[
        SeedWord { target: "bonjour", native: "hello", word_type: "interjection", pronunciation: Some("bohn-ZHOOR") },
        SeedWord { target: "au revoir", native: "goodbye", word_type: "phrase", pronunciation: Some("oh ruh-VWAHR") },
        SeedWord { target: "merci", native: "thank you", word_type: "interjection", pronunciation: Some("mehr-SEE") },
        SeedWord { target: "s'il vous plaît", native: "please", word_type: "phrase", pronunciation: Some("seel voo PLEH") },
        SeedWord { target: "oui", native: "yes", word_type: "adverb", pronunciation: Some("wee") },
        SeedWord { target: "non", native: "no", word_type: "adverb", pronunciation: Some("nohn") },
    ],
    seed_dialogue: &[
        ("speaker_a", "Bonjour ! Ça va ?", "Hello! How are you?"),
        ("speaker_b", "Ça va bien, merci. Et toi ?", "I'm fine, thanks. And you?"),
        ("speaker_a", "Très bien. Au revoir !", "Very well. Goodbye!"),
    ],
    prompt_guidance: "Final consonants are usually silent; point out liaison. Build words up from the final syllable (mer-ci: ci, merci).",
};

const GERMAN: LanguageProfile = LanguageProfile {
    code: "de",
    name: "German",
    default_voice: "echo",
    narrator_voice: "alloy",
    voices: &[
        ("narrator", "alloy"),
        ("teacher", "echo"),
        ("speaker_a", "nova"),
        ("speaker_b", "onyx"),
        ("anna", "nova"),
        ("lukas", "onyx"),
    ],
    speaker_names: ["Anna", "Lukas"],
    farewell: "Sehr gut! Bis zum nächsten Mal.",
    dialogue_pattern: r"^\s*(?:[—–-]\s*)?(?P<speaker>[\p{L}][\p{L} .'_-]{0,23}?)\s*:\s*(?P<line>\S.*)$",
    seed_title: "Begrüßungen",
    seed_vocabulary: &[
        SeedWord { target: "hallo", native: "hello", word_type: "interjection", pronunciation: Some("HAH-loh") },
        SeedWord { target: "tschüss", native: "bye", word_type: "interjection", pronunciation: Some("tshoos") },
        SeedWord { target: "danke", native: "thank you", word_type: "interjection", pronunciation: Some("DAHN-kuh") },
        SeedWord { target: "bitte", native: "please", word_type: "adverb", pronunciation: Some("BIT-tuh") },
        SeedWord { target: "ja", native: "yes", word_type: "adverb", pronunciation: Some("yah") },
        SeedWord { target: "nein", native: "no", word_type: "adverb", pronunciation: Some("nine") },
    ],
    seed_dialogue: &[
        ("speaker_a", "Hallo! Wie geht's?", "Hi! How are you?"),
        ("speaker_b", "Gut, danke. Und dir?", "Good, thanks. And you?"),
        ("speaker_a", "Sehr gut. Tschüss!", "Very good. Bye!"),
    ],
    prompt_guidance: "Always give nouns with their article. Build compound words up from the last component.",
};

const ITALIAN: LanguageProfile = LanguageProfile {
    code: "it",
    name: "Italian",
    default_voice: "nova",
    narrator_voice: "alloy",
    voices: &[
        ("narrator", "alloy"),
        ("teacher", "nova"),
        ("speaker_a", "shimmer"),
        ("speaker_b", "fable"),
        ("giulia", "shimmer"),
        ("marco", "fable"),
    ],
    speaker_names: ["Giulia", "Marco"],
    farewell: "Benissimo! Alla prossima.",
    dialogue_pattern: r"^\s*(?:[—–-]\s*)?(?P<speaker>[\p{L}][\p{L} .'_-]{0,23}?)\s*:\s*(?P<line>\S.*)$",
    seed_title: "Saluti",
    seed_vocabulary: &[
        SeedWord { target: "ciao", native: "hi / bye", word_type: "interjection", pronunciation: Some("chow") },
        SeedWord { target: "arrivederci", native: "goodbye", word_type: "interjection", pronunciation: Some("ah-ree-veh-DEHR-chee") },
        SeedWord { target: "grazie", native: "thank you", word_type: "interjection", pronunciation: Some("GRAHT-tsyeh") },
        SeedWord { target: "per favore", native: "please", word_type: "phrase", pronunciation: Some("pehr fah-VOH-reh") },
        SeedWord { target: "sì", native: "yes", word_type: "adverb", pronunciation: Some("see") },
        SeedWord { target: "no", native: "no", word_type: "adverb", pronunciation: Some("noh") },
    ],
    seed_dialogue: &[
        ("speaker_a", "Ciao! Come stai?", "Hi! How are you?"),
        ("speaker_b", "Bene, grazie. E tu?", "Fine, thanks. And you?"),
        ("speaker_a", "Benissimo. Arrivederci!", "Very well. Goodbye!"),
    ],
    prompt_guidance: "Mark double consonants clearly. Build words up from the final syllable (gra-zie: zie, grazie).",
};

static DIALOGUE_PATTERNS: LazyLock<HashMap<Language, Regex>> = LazyLock::new(|| {
    Language::ALL
        .iter()
        .filter_map(|language| {
            // Patterns are constants; a bad one only disables line splitting.
            Regex::new(language.profile().dialogue_pattern)
                .ok()
                .map(|re| (*language, re))
        })
        .collect()
});

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
    ];

    pub fn profile(&self) -> &'static LanguageProfile {
        match self {
            Language::Spanish => &SPANISH,
            Language::French => &FRENCH,
            Language::German => &GERMAN,
            Language::Italian => &ITALIAN,
        }
    }

    pub fn code(&self) -> &'static str {
        self.profile().code
    }

    pub fn name(&self) -> &'static str {
        self.profile().name
    }

    /// Resolves a speaker role to a voice, falling back to the language default.
    pub fn voice_for(&self, role: &str) -> &'static str {
        let profile = self.profile();
        let role = role.trim().to_lowercase();
        if role == "native" {
            return profile.narrator_voice;
        }
        profile
            .voices
            .iter()
            .find(|(known, _)| *known == role)
            .map(|(_, voice)| *voice)
            .unwrap_or(profile.default_voice)
    }

    /// Splits a multi-line dialogue text into `(speaker, line)` pairs.
    ///
    /// Lines that do not match the dialogue pattern are attributed to the
    /// previous speaker, or to the narrator when there is none.
    pub fn parse_dialogue_lines(&self, text: &str) -> Vec<(String, String)> {
        let Some(pattern) = DIALOGUE_PATTERNS.get(self) else {
            return vec![("narrator".to_string(), text.trim().to_string())];
        };
        let mut lines: Vec<(String, String)> = Vec::new();
        for raw in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match pattern.captures(raw) {
                Some(caps) => lines.push((caps["speaker"].trim().to_string(), caps["line"].trim().to_string())),
                None => {
                    let speaker = lines
                        .last()
                        .map(|(s, _)| s.clone())
                        .unwrap_or_else(|| "narrator".to_string());
                    lines.push((speaker, raw.to_string()));
                }
            }
        }
        lines
    }

    /// The starter unit used when the curriculum has no data for unit 1.
    pub fn seed_unit(&self) -> UnitDefinition {
        let profile = self.profile();
        UnitDefinition {
            language: *self,
            level: 1,
            unit: 1,
            title: profile.seed_title.to_string(),
            categories: vec!["greetings".to_string()],
            dialogue: profile
                .seed_dialogue
                .iter()
                .map(|(speaker, target, native)| DialogueLine {
                    speaker: speaker.to_string(),
                    target: target.to_string(),
                    native: native.to_string(),
                })
                .collect(),
            vocabulary: profile
                .seed_vocabulary
                .iter()
                .map(|w| VocabularyItem {
                    target: w.target.to_string(),
                    native: w.native.to_string(),
                    word_type: w.word_type.to_string(),
                    pronunciation: w.pronunciation.map(str::to_string),
                })
                .collect(),
            phrases: Vec::new(),
            grammar_notes: Vec::new(),
            review_units: Vec::new(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Spanish => write!(f, "spanish"),
            Language::French => write!(f, "french"),
            Language::German => write!(f, "german"),
            Language::Italian => write!(f, "italian"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spanish" | "es" => Ok(Language::Spanish),
            "french" | "fr" => Ok(Language::French),
            "german" | "de" => Ok(Language::German),
            "italian" | "it" => Ok(Language::Italian),
            other => Err(format!("Unsupported language: '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_dialogue_pattern_compiles() {
        for language in Language::ALL {
            assert!(DIALOGUE_PATTERNS.contains_key(&language), "{language}");
        }
    }

    #[test]
    fn test_voice_resolution_falls_back_to_default() {
        assert_eq!(Language::Spanish.voice_for("speaker_b"), "onyx");
        assert_eq!(Language::Spanish.voice_for("  Carlos "), "onyx");
        assert_eq!(Language::Spanish.voice_for("native"), "alloy");
        assert_eq!(Language::Spanish.voice_for("stranger"), "nova");
        assert_eq!(Language::German.voice_for(""), "echo");
    }

    #[test]
    fn test_parse_dialogue_lines() {
        let text = "María: ¡Hola! ¿Qué tal?\n\nCarlos: Bien, gracias.\n¿Y tú?";
        let lines = Language::Spanish.parse_dialogue_lines(text);
        assert_eq!(
            lines,
            vec![
                ("María".to_string(), "¡Hola! ¿Qué tal?".to_string()),
                ("Carlos".to_string(), "Bien, gracias.".to_string()),
                ("Carlos".to_string(), "¿Y tú?".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_dialogue_without_speakers() {
        let lines = Language::French.parse_dialogue_lines("Bonjour tout le monde");
        assert_eq!(lines, vec![("narrator".to_string(), "Bonjour tout le monde".to_string())]);
    }

    #[test]
    fn test_language_from_str_and_display() {
        for language in Language::ALL {
            assert_eq!(language.to_string().parse::<Language>(), Ok(language));
            assert_eq!(language.code().parse::<Language>(), Ok(language));
        }
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn test_seed_unit_is_complete() {
        for language in Language::ALL {
            let unit = language.seed_unit();
            assert_eq!((unit.level, unit.unit), (1, 1));
            assert!(!unit.vocabulary.is_empty());
            assert!(!unit.dialogue.is_empty());
        }
    }
}
