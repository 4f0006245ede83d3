use std::io::Write;
use std::process::{Child, Command, Output, Stdio};

use super::model::KokoroError;
use super::vocab::Vocab;

/// espeak-ng language for a Kokoro voice.
///
/// Voice names look like `af_heart`: language letter, gender letter, name.
/// Names without that prefix are treated as American English.
pub fn voice_lang(voice: &str) -> &'static str {
    let language = match voice.split_once('_') {
        Some((prefix, _)) if prefix.chars().count() == 2 => prefix.chars().next(),
        _ => None,
    };
    match language {
        Some('b') => "en-gb",
        Some('e') => "es",
        Some('f') => "fr-fr",
        Some('h') => "hi",
        Some('i') => "it",
        Some('j') => "ja",
        Some('p') => "pt-br",
        Some('z') => "cmn",
        _ => "en-us",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Words(String),
    Mark(char),
}

/// Convert `text` to Kokoro token ids using espeak-ng for `lang`.
///
/// Punctuation is kept as its own token; symbols missing from `vocab` are
/// dropped.
pub fn phonemize(text: &str, lang: &str, vocab: &Vocab) -> Result<Vec<i64>, KokoroError> {
    let segments = segment(text);
    let phrases: Vec<&str> = segments
        .iter()
        .filter_map(|s| match s {
            Segment::Words(words) => Some(words.as_str()),
            Segment::Mark(_) => None,
        })
        .collect();
    if phrases.is_empty() {
        return Ok(marks_only(&segments, vocab));
    }

    let transcribed = espeak_lines(&phrases, lang)?;
    let mut phrases = transcribed.iter();
    let mut ids = Vec::new();
    for s in &segments {
        match s {
            Segment::Words(_) => {
                if let Some(ipa) = phrases.next() {
                    ids.extend(ipa_to_ids(ipa, vocab));
                }
            }
            Segment::Mark(ch) => ids.extend(vocab.get(ch).copied()),
        }
    }
    Ok(ids)
}

fn marks_only(segments: &[Segment], vocab: &Vocab) -> Vec<i64> {
    segments
        .iter()
        .filter_map(|s| match s {
            Segment::Mark(ch) => vocab.get(ch).copied(),
            Segment::Words(_) => None,
        })
        .collect()
}

/// Split text into word runs and punctuation marks, collapsing whitespace.
///
/// `.` and `,` between two digits stay inside the number.
fn segment(text: &str) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut words = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        let in_number = matches!(ch, '.' | ',')
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);

        if let Some(mark) = boundary_mark(ch).filter(|_| !in_number) {
            flush(&mut words, &mut segments);
            segments.push(Segment::Mark(mark));
        } else if ch.is_whitespace() {
            if !words.is_empty() && !words.ends_with(' ') {
                words.push(' ');
            }
        } else {
            words.push(ch);
        }
    }
    flush(&mut words, &mut segments);
    segments
}

fn flush(words: &mut String, segments: &mut Vec<Segment>) {
    let trimmed = words.trim();
    if !trimmed.is_empty() {
        segments.push(Segment::Words(trimmed.to_string()));
    }
    words.clear();
}

fn boundary_mark(ch: char) -> Option<char> {
    match ch {
        '\n' | '\r' => Some('.'),
        '.' | ',' | ';' | ':' | '!' | '?' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        _ => None,
    }
}

/// Transcribe each phrase to IPA, one output line per input phrase.
fn espeak_lines(phrases: &[&str], lang: &str) -> Result<Vec<String>, KokoroError> {
    let output = run_espeak(&phrases.join("\n"), lang)?;
    let lines: Vec<String> = output.lines().map(str::to_string).collect();
    if lines.len() == phrases.len() {
        return Ok(lines);
    }

    log::debug!(
        "espeak-ng returned {} lines for {} phrases, transcribing one at a time",
        lines.len(),
        phrases.len()
    );
    phrases
        .iter()
        .map(|phrase| run_espeak(phrase, lang).map(|ipa| ipa.lines().collect::<Vec<_>>().join(" ")))
        .collect()
}

fn run_espeak(input: &str, lang: &str) -> Result<String, KokoroError> {
    let child = Command::new("espeak-ng")
        .args(["--ipa", "--stdin", "-q", "-v", lang])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KokoroError::EspeakNotFound,
            _ => KokoroError::Io(e),
        })?;

    let output = feed_and_collect(child, input)?;
    if !output.status.success() {
        return Err(KokoroError::PhonemizerFailed(format!(
            "espeak-ng exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Write `input` to the child's stdin from a separate thread while its
/// output is collected, so a full stdout pipe cannot stall the writer.
fn feed_and_collect(mut child: Child, input: &str) -> std::io::Result<Output> {
    // espeak-ng reads stdin line by line; an unterminated last line loses its final phoneme.
    let mut payload = input.to_string();
    if !payload.ends_with('\n') {
        payload.push('\n');
    }

    let writer = child
        .stdin
        .take()
        .map(|mut stdin| std::thread::spawn(move || stdin.write_all(payload.as_bytes())));
    let output = child.wait_with_output()?;

    if let Some(writer) = writer {
        writer
            .join()
            .map_err(|_| std::io::Error::other("espeak-ng stdin writer panicked"))??;
    }
    Ok(output)
}

fn ipa_to_ids<'a>(ipa: &'a str, vocab: &'a Vocab) -> impl Iterator<Item = i64> + 'a {
    ipa.trim()
        .chars()
        .filter(|ch| *ch != '_')
        .filter_map(|ch| vocab.get(&ch).copied())
}
