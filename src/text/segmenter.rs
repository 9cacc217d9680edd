//! Sentence segmentation.
//!
//! Rules, in order:
//! - a newline ends a sentence (when `split_on_newlines` is set);
//! - a run of `.`, `!` or `?` (with any closing quotes or brackets) ends a
//!   sentence when whitespace follows it;
//! - a lone `.` after a known abbreviation or a single capital initial does not.
//!
//! A `.` inside a number has no whitespace after it, so decimals stay whole.

use crate::defaults;
use crate::pipeline::types::Utterance;

const TERMINATORS: &[char] = &['.', '!', '?'];
const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201d}', '\u{2019}'];

/// How input is cut into utterances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentMode {
    /// One utterance per sentence.
    #[default]
    Sentences,
    /// The entire input as one utterance.
    Whole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    pub mode: SegmentMode,
    pub split_on_newlines: bool,
    /// Keep abbreviations such as "Dr." inside the sentence.
    pub abbreviations: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            mode: SegmentMode::Sentences,
            split_on_newlines: true,
            abbreviations: true,
        }
    }
}

impl SegmenterConfig {
    pub fn whole() -> Self {
        Self {
            mode: SegmentMode::Whole,
            ..Self::default()
        }
    }
}

/// Incremental segmenter: feed chunks, collect finished sentences.
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmenterConfig,
    buffer: String,
    next_index: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            next_index: 0,
        }
    }

    /// Lazily segment a complete string. The iterator is `Clone`, so the
    /// sequence can be restarted from the beginning.
    pub fn sentences(text: &str, config: SegmenterConfig) -> Sentences<'_> {
        Sentences {
            rest: text,
            config,
            next_index: 0,
        }
    }

    /// Append a chunk and return every sentence it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<Utterance> {
        self.buffer.push_str(chunk);
        if self.config.mode == SegmentMode::Whole {
            return Vec::new();
        }

        let mut out = Vec::new();
        while let Some((end, next)) = find_boundary(&self.buffer, &self.config, false) {
            let sentence = self.buffer[..end].trim().to_string();
            self.buffer.drain(..next);
            if let Some(utterance) = self.make_utterance(sentence) {
                out.push(utterance);
            }
        }
        out
    }

    /// End of input: emit the trailing partial sentence, if any.
    pub fn finish(&mut self) -> Option<Utterance> {
        let rest = std::mem::take(&mut self.buffer);
        self.make_utterance(rest.trim().to_string())
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Index the next utterance will get.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Forget pending text and restart numbering.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_index = 0;
    }

    fn make_utterance(&mut self, text: String) -> Option<Utterance> {
        if text.is_empty() {
            return None;
        }
        let utterance = Utterance::new(self.next_index, text);
        self.next_index += 1;
        Some(utterance)
    }
}

/// Sentences of a complete string, produced on demand.
#[derive(Debug, Clone)]
pub struct Sentences<'a> {
    rest: &'a str,
    config: SegmenterConfig,
    next_index: u64,
}

impl Iterator for Sentences<'_> {
    type Item = Utterance;

    fn next(&mut self) -> Option<Utterance> {
        loop {
            if self.rest.is_empty() {
                return None;
            }

            let sentence = match self.config.mode {
                SegmentMode::Whole => std::mem::take(&mut self.rest),
                SegmentMode::Sentences => match find_boundary(self.rest, &self.config, true) {
                    Some((end, next)) => {
                        let sentence = &self.rest[..end];
                        self.rest = &self.rest[next..];
                        sentence
                    }
                    None => std::mem::take(&mut self.rest),
                },
            };

            let sentence = sentence.trim();
            if !sentence.is_empty() {
                let utterance = Utterance::new(self.next_index, sentence);
                self.next_index += 1;
                return Some(utterance);
            }
        }
    }
}

/// Find the first confirmed sentence boundary in `text`.
///
/// Returns `(end, next)`: the sentence is `text[..end]` and scanning resumes at
/// `next`. A terminator at the very end is only a boundary when `at_end`.
fn find_boundary(text: &str, config: &SegmenterConfig, at_end: bool) -> Option<(usize, usize)> {
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\n' && config.split_on_newlines {
            return Some((i, i + 1));
        }
        if !TERMINATORS.contains(&c) {
            continue;
        }

        let mut run_end = i + c.len_utf8();
        let mut lone_period = c == '.';
        while let Some(&(j, next)) = chars.peek() {
            if TERMINATORS.contains(&next) {
                lone_period = false;
            } else if !CLOSERS.contains(&next) {
                break;
            }
            run_end = j + next.len_utf8();
            chars.next();
        }

        match text[run_end..].chars().next() {
            None if at_end => return Some((run_end, run_end)),
            None => return None,
            Some(after) if after.is_whitespace() => {
                if lone_period && config.abbreviations {
                    if is_abbreviation(&text[..i]) {
                        continue;
                    }
                    if is_number_prefix(&text[..i]) {
                        match text[run_end..].trim_start().chars().next() {
                            Some(d) if d.is_ascii_digit() => continue,
                            // The number may still be on its way
                            None if !at_end => return None,
                            _ => {}
                        }
                    }
                }
                return Some((run_end, run_end));
            }
            Some(_) => {}
        }
    }
    None
}

/// The word (letters, digits and inner dots) that ends `before`.
fn last_word(before: &str) -> &str {
    let start = before
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '.'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &before[start..]
}

/// Whether the word ending `before` makes a following `.` non-terminal.
fn is_abbreviation(before: &str) -> bool {
    let word = last_word(before);

    let mut chars = word.chars();
    if let (Some(initial), None) = (chars.next(), chars.next()) {
        return initial.is_uppercase() && initial != 'I';
    }

    let lower = word.to_lowercase();
    defaults::ABBREVIATIONS.contains(&lower.as_str())
}

/// "No" and friends, matched case-sensitively.
fn is_number_prefix(before: &str) -> bool {
    defaults::NUMBER_PREFIXES.contains(&last_word(before))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(text: &str) -> Vec<String> {
        Segmenter::sentences(text, SegmenterConfig::default())
            .map(|u| u.text)
            .collect()
    }

    #[test]
    fn test_three_sentences() {
        let utterances: Vec<_> =
            Segmenter::sentences("Hello there. How are you? Great!", SegmenterConfig::default())
                .collect();
        assert_eq!(
            utterances,
            vec![
                Utterance::new(0, "Hello there."),
                Utterance::new(1, "How are you?"),
                Utterance::new(2, "Great!"),
            ]
        );
    }

    #[test]
    fn test_sentences_restartable() {
        let sentences = Segmenter::sentences("One. Two. Three.", SegmenterConfig::default());
        let first: Vec<_> = sentences.clone().collect();
        let second: Vec<_> = sentences.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_terminator_runs_and_closers() {
        assert_eq!(
            texts("Really?! Yes... \"Go now.\" Done"),
            vec!["Really?!", "Yes...", "\"Go now.\"", "Done"]
        );
    }

    #[test]
    fn test_abbreviations_and_initials() {
        assert_eq!(
            texts("Dr. Smith met Mr. J. Doe at St. Mary's. They talked."),
            vec!["Dr. Smith met Mr. J. Doe at St. Mary's.", "They talked."]
        );
        assert_eq!(
            texts("Bring fruit, e.g. apples. Then leave."),
            vec!["Bring fruit, e.g. apples.", "Then leave."]
        );
    }

    #[test]
    fn test_no_ends_sentence_unless_a_number_follows() {
        assert_eq!(
            texts("The answer is no. We are leaving now."),
            vec!["The answer is no.", "We are leaving now."]
        );
        assert_eq!(
            texts("Say No. Then go."),
            vec!["Say No.", "Then go."]
        );
        assert_eq!(
            texts("Track No. 5 is next. Play it."),
            vec!["Track No. 5 is next.", "Play it."]
        );
    }

    #[test]
    fn test_incremental_number_prefix_waits_for_next_word() {
        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        assert!(segmenter.push("Track No. ").is_empty());
        assert_eq!(
            segmenter.push("7 plays. Next"),
            vec![Utterance::new(0, "Track No. 7 plays.")]
        );

        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        assert!(segmenter.push("I said No. ").is_empty());
        assert_eq!(
            segmenter.push("Really"),
            vec![Utterance::new(0, "I said No.")]
        );
    }

    #[test]
    fn test_pronoun_i_ends_sentence() {
        assert_eq!(texts("So did I. Then we left."), vec!["So did I.", "Then we left."]);
    }

    #[test]
    fn test_abbreviation_rule_can_be_disabled() {
        let config = SegmenterConfig {
            abbreviations: false,
            ..SegmenterConfig::default()
        };
        let out: Vec<_> = Segmenter::sentences("Dr. Smith left.", config)
            .map(|u| u.text)
            .collect();
        assert_eq!(out, vec!["Dr.", "Smith left."]);
    }

    #[test]
    fn test_decimals_not_split() {
        assert_eq!(
            texts("Pi is 3.14 roughly. Version 2.0.1 shipped."),
            vec!["Pi is 3.14 roughly.", "Version 2.0.1 shipped."]
        );
    }

    #[test]
    fn test_newlines_split_by_default() {
        assert_eq!(texts("first line\nsecond line"), vec!["first line", "second line"]);

        let config = SegmenterConfig {
            split_on_newlines: false,
            ..SegmenterConfig::default()
        };
        let out: Vec<_> = Segmenter::sentences("first line\nsecond line", config)
            .map(|u| u.text)
            .collect();
        assert_eq!(out, vec!["first line\nsecond line"]);
    }

    #[test]
    fn test_blank_segments_do_not_consume_indices() {
        let utterances: Vec<_> =
            Segmenter::sentences("One.\n\n   \n Two.", SegmenterConfig::default()).collect();
        let indices: Vec<_> = utterances.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(utterances[1].text, "Two.");
        assert_eq!(texts("   \n\n  "), Vec::<String>::new());
        assert_eq!(texts(""), Vec::<String>::new());
    }

    #[test]
    fn test_whole_mode() {
        let out: Vec<_> = Segmenter::sentences(
            "  Hello there. How are you? Great!  ",
            SegmenterConfig::whole(),
        )
        .collect();
        assert_eq!(out, vec![Utterance::new(0, "Hello there. How are you? Great!")]);
    }

    #[test]
    fn test_incremental_emits_as_soon_as_confirmed() {
        let mut segmenter = Segmenter::new(SegmenterConfig::default());

        assert!(segmenter.push("Hello the").is_empty());
        // Terminator at the end of the buffer waits for the next character.
        assert!(segmenter.push("re.").is_empty());
        assert_eq!(
            segmenter.push(" How"),
            vec![Utterance::new(0, "Hello there.")]
        );
        assert_eq!(
            segmenter.push(" are you? Great"),
            vec![Utterance::new(1, "How are you?")]
        );
        assert_eq!(segmenter.pending().trim(), "Great");
        assert_eq!(segmenter.finish(), Some(Utterance::new(2, "Great")));
        assert_eq!(segmenter.finish(), None);
    }

    #[test]
    fn test_incremental_abbreviation_across_chunks() {
        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        assert!(segmenter.push("Ask Dr.").is_empty());
        assert!(segmenter.push(" Who now").is_empty());
        assert_eq!(
            segmenter.push(". Bye"),
            vec![Utterance::new(0, "Ask Dr. Who now.")]
        );
    }

    #[test]
    fn test_incremental_matches_whole_string() {
        let text = "It works. Mostly!\nA decimal 1.5 here? Trailing bit";
        let expected: Vec<_> = Segmenter::sentences(text, SegmenterConfig::default()).collect();

        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        let mut got = Vec::new();
        for ch in text.chars() {
            got.extend(segmenter.push(&ch.to_string()));
        }
        got.extend(segmenter.finish());
        assert_eq!(got, expected);
    }

    #[test]
    fn test_incremental_whole_mode_waits_for_finish() {
        let mut segmenter = Segmenter::new(SegmenterConfig::whole());
        assert!(segmenter.push("One. Two.").is_empty());
        assert!(segmenter.push(" Three.").is_empty());
        assert_eq!(segmenter.finish(), Some(Utterance::new(0, "One. Two. Three.")));
    }

    #[test]
    fn test_reset() {
        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        segmenter.push("One. Two");
        segmenter.reset();
        assert_eq!(segmenter.next_index(), 0);
        assert_eq!(segmenter.pending(), "");
    }
}
