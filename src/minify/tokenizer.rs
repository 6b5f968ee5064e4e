//! Lazy markup tokenizer.
//!
//! Produces a finite, single-pass sequence of [`Token`]s over a borrowed
//! buffer. When the buffer is not the end of the document, an incomplete
//! trailing construct stops the iteration and is left unconsumed so the caller
//! can retry once more input arrives.

use super::error::MinifyError;

/// Elements whose content is raw text rather than markup.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Start tag, `raw` is the full tag text including `<` and `>`.
    StartTag {
        name: &'a str,
        raw: &'a str,
        self_closing: bool,
    },
    EndTag {
        name: &'a str,
    },
    Text(&'a str),
    /// Comment body between `<!--` and `-->`.
    Comment(&'a str),
    /// Declaration body between `<!` and `>`.
    Declaration(&'a str),
    /// Full processing instruction including delimiters.
    ProcessingInstruction(&'a str),
    /// Reference body between `&#` and `;`.
    CharRef(&'a str),
    /// Entity name between `&` and `;`.
    EntityRef(&'a str),
}

/// Raw-text element whose closing tag the tokenizer is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawText(&'static str);

impl RawText {
    fn lookup(name: &str) -> Option<Self> {
        RAW_TEXT_ELEMENTS
            .iter()
            .copied()
            .find(|candidate| candidate.eq_ignore_ascii_case(name))
            .map(Self)
    }
}

enum Step<'a> {
    Emit(Token<'a>, usize),
    Hold,
}

pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    at_eof: bool,
    base_offset: usize,
    raw_text: Option<RawText>,
    failed: bool,
}

impl<'a> Tokenizer<'a> {
    /// Tokenize a complete document.
    pub fn new(input: &'a str) -> Self {
        Self::resume(input, true, None, 0)
    }

    /// Tokenize a buffer that may be followed by more input.
    ///
    /// `raw_text` carries an open `script`/`style` element over from the
    /// previous buffer; `base_offset` is added to error offsets.
    pub fn resume(
        input: &'a str,
        at_eof: bool,
        raw_text: Option<RawText>,
        base_offset: usize,
    ) -> Self {
        Self {
            input,
            pos: 0,
            at_eof,
            base_offset,
            raw_text,
            failed: false,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn raw_text(&self) -> Option<RawText> {
        self.raw_text
    }

    fn error(&self, reason: &'static str) -> MinifyError {
        MinifyError::parse(self.base_offset + self.pos, reason)
    }

    /// Incomplete input: hold at end of a chunk, fail at end of document.
    fn incomplete(&self, reason: &'static str) -> Result<Step<'a>, MinifyError> {
        if self.at_eof {
            Err(self.error(reason))
        } else {
            Ok(Step::Hold)
        }
    }

    fn step(&mut self) -> Result<Step<'a>, MinifyError> {
        let input = self.input;
        let rest = &input[self.pos..];

        if let Some(RawText(element)) = self.raw_text {
            let closing = format!("</{element}");
            match find_ignore_ascii_case(rest, &closing) {
                Some(0) => self.raw_text = None,
                Some(index) => return Ok(Step::Emit(Token::Text(&rest[..index]), index)),
                None if self.at_eof => return Ok(Step::Emit(Token::Text(rest), rest.len())),
                None => return Ok(Step::Hold),
            }
        }

        if rest.starts_with('<') {
            self.markup(rest)
        } else if rest.starts_with('&') {
            Ok(self.reference(rest))
        } else {
            match rest.find(['<', '&']) {
                Some(index) => Ok(Step::Emit(Token::Text(&rest[..index]), index)),
                None if self.at_eof => Ok(Step::Emit(Token::Text(rest), rest.len())),
                None => Ok(Step::Hold),
            }
        }
    }

    fn markup(&mut self, rest: &'a str) -> Result<Step<'a>, MinifyError> {
        let mut chars = rest[1..].chars();
        match chars.next() {
            None if self.at_eof => Ok(Step::Emit(Token::Text("<"), 1)),
            None => Ok(Step::Hold),
            Some('!') => self.bang(rest),
            Some('?') => match rest.find('>') {
                Some(end) => Ok(Step::Emit(
                    Token::ProcessingInstruction(&rest[..=end]),
                    end + 1,
                )),
                None => self.incomplete("unterminated processing instruction"),
            },
            Some('/') => self.end_tag(rest),
            Some(ch) if ch.is_ascii_alphabetic() => self.start_tag(rest),
            Some(_) => Ok(Step::Emit(Token::Text("<"), 1)),
        }
    }

    fn bang(&self, rest: &'a str) -> Result<Step<'a>, MinifyError> {
        if rest.starts_with("<!--") {
            return match rest[4..].find("-->") {
                Some(index) => Ok(Step::Emit(Token::Comment(&rest[4..4 + index]), index + 7)),
                None => self.incomplete("unterminated comment"),
            };
        }
        if rest.len() < 4 && "<!--".starts_with(rest) && !self.at_eof {
            return Ok(Step::Hold);
        }
        if rest.starts_with("<![CDATA[") {
            return match rest.find("]]>") {
                Some(index) => Ok(Step::Emit(
                    Token::Declaration(&rest[2..index + 2]),
                    index + 3,
                )),
                None => self.incomplete("unterminated CDATA section"),
            };
        }
        match rest.find('>') {
            Some(end) => Ok(Step::Emit(Token::Declaration(&rest[2..end]), end + 1)),
            None => self.incomplete("unterminated declaration"),
        }
    }

    fn end_tag(&self, rest: &'a str) -> Result<Step<'a>, MinifyError> {
        match rest[2..].chars().next() {
            None => self.incomplete("truncated end tag"),
            Some('>') => Err(self.error("empty end tag")),
            Some(ch) if ch.is_ascii_alphabetic() => {
                let name = tag_name(&rest[2..]);
                match rest.find('>') {
                    Some(end) => Ok(Step::Emit(Token::EndTag { name }, end + 1)),
                    None => self.incomplete("unterminated end tag"),
                }
            }
            Some(_) => Err(self.error("malformed end tag")),
        }
    }

    fn start_tag(&mut self, rest: &'a str) -> Result<Step<'a>, MinifyError> {
        let name = tag_name(&rest[1..]);
        let Some(end) = tag_end(rest, 1 + name.len()) else {
            return self.incomplete("unterminated start tag");
        };

        let raw = &rest[..=end];
        let self_closing = rest[..end].trim_end().ends_with('/');
        if !self_closing {
            self.raw_text = RawText::lookup(name);
        }

        Ok(Step::Emit(
            Token::StartTag {
                name,
                raw,
                self_closing,
            },
            end + 1,
        ))
    }

    fn reference(&self, rest: &'a str) -> Step<'a> {
        let numeric = rest[1..].starts_with('#');
        let start = if numeric { 2 } else { 1 };
        let body = &rest[start..];
        let len = body
            .find(|ch: char| !ch.is_ascii_alphanumeric())
            .unwrap_or(body.len());

        if len == body.len() && !self.at_eof {
            return Step::Hold;
        }
        if len == 0 || (!numeric && !body.starts_with(|ch: char| ch.is_ascii_alphabetic())) {
            return Step::Emit(Token::Text("&"), 1);
        }

        let name = &body[..len];
        let terminated = body[len..].starts_with(';');
        let consumed = start + len + usize::from(terminated);

        if numeric {
            Step::Emit(Token::CharRef(name), consumed)
        } else if terminated || len < body.len() {
            Step::Emit(Token::EntityRef(name), consumed)
        } else {
            // `&name` at the very end of the document stays literal text.
            Step::Emit(Token::Text(&rest[..consumed]), consumed)
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>, MinifyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.input.len() {
            return None;
        }

        match self.step() {
            Ok(Step::Emit(token, consumed)) => {
                self.pos += consumed;
                Some(Ok(token))
            }
            Ok(Step::Hold) => None,
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

fn tag_name(input: &str) -> &str {
    let len = input
        .find(|ch: char| ch.is_ascii_whitespace() || ch == '/' || ch == '>')
        .unwrap_or(input.len());
    &input[..len]
}

/// Index of the `>` closing a start tag, skipping quoted attribute values.
fn tag_end(input: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (index, byte) in input.bytes().enumerate().skip(from) {
        match (quote, byte) {
            (Some(open), _) if byte == open => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some(index),
            (None, _) => {}
        }
    }
    None
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}
