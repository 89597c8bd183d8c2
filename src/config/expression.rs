//! Scanner for expressions embedded in configuration strings.
//!
//! Two forms are recognised anywhere inside a string:
//!
//! - `operation(arg, arg, ...)`: arguments may contain balanced parentheses,
//!   so `wrap(get(database))` is a single expression with one argument.
//! - `operation:token`: the token runs up to the next whitespace.
//!
//! Operation names are `[a-zA-Z_-]+` and are only considered when a handler
//! is registered for them; anything else is literal text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Expression<'a> {
    /// Full matched text, used for substitution.
    pub text: &'a str,
    pub operation: &'a str,
    pub operands: Operands<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operands<'a> {
    Call(Vec<&'a str>),
    Decorate(&'a str),
}

/// Collects every non-overlapping expression in `input`, left to right.
pub(crate) fn scan<'a>(input: &'a str, is_registered: impl Fn(&str) -> bool) -> Vec<Expression<'a>> {
    let mut cursor = Cursor { input, pos: 0 };
    let mut found = Vec::new();

    while cursor.peek().is_some() {
        let start = cursor.pos;
        let operation = cursor.take_while(is_operation_char);

        if operation.is_empty() {
            cursor.bump();
            continue;
        }

        // A call to an unknown operation is literal text, arguments included.
        // The decorated form is skipped by name only, so `https://get(host)`
        // still finds `get(host)`.
        if !is_registered(operation) {
            if cursor.peek() == Some('(') {
                let checkpoint = cursor.pos;
                if cursor.arguments().is_none() {
                    cursor.pos = checkpoint;
                }
            }
            continue;
        }

        if let Some(operands) = cursor.operands() {
            found.push(Expression {
                text: &input[start..cursor.pos],
                operation,
                operands,
            });
        }
    }

    found
}

/// Returns the expression when `input` consists of exactly one registered
/// expression, ignoring surrounding whitespace.
pub(crate) fn is_single<'a>(input: &'a str, is_registered: impl Fn(&str) -> bool) -> Option<Expression<'a>> {
    let input = input.trim();
    let mut found = scan(input, is_registered);
    match found.pop() {
        Some(expression) if found.is_empty() && expression.text == input => Some(expression),
        _ => None,
    }
}

fn is_operation_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-'
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Option<()> {
        if self.peek()? != expected {
            return None;
        }
        self.bump();
        Some(())
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.bump();
        }
        &self.input[start..self.pos]
    }

    /// Parses the part after an operation name, rewinding on failure.
    fn operands(&mut self) -> Option<Operands<'a>> {
        let checkpoint = self.pos;
        let parsed = match self.peek()? {
            '(' => self.arguments().map(Operands::Call),
            ':' => self.decorated().map(Operands::Decorate),
            _ => None,
        };
        if parsed.is_none() {
            self.pos = checkpoint;
        }
        parsed
    }

    fn arguments(&mut self) -> Option<Vec<&'a str>> {
        self.expect('(')?;
        let mut args = Vec::new();
        let mut start = self.pos;

        loop {
            match self.peek()? {
                ')' => {
                    args.push(&self.input[start..self.pos]);
                    self.bump();
                    break;
                }
                ',' => {
                    args.push(&self.input[start..self.pos]);
                    self.bump();
                    start = self.pos;
                }
                '(' => self.group()?,
                '\'' | '"' => self.quoted()?,
                _ => self.bump(),
            }
        }

        if args.len() == 1 && args[0].trim().is_empty() {
            return None;
        }
        Some(args)
    }

    fn group(&mut self) -> Option<()> {
        self.expect('(')?;
        loop {
            match self.peek()? {
                ')' => {
                    self.bump();
                    return Some(());
                }
                '(' => self.group()?,
                '\'' | '"' => self.quoted()?,
                _ => self.bump(),
            }
        }
    }

    fn quoted(&mut self) -> Option<()> {
        let quote = self.peek()?;
        self.bump();
        while self.peek()? != quote {
            self.bump();
        }
        self.bump();
        Some(())
    }

    fn decorated(&mut self) -> Option<&'a str> {
        self.expect(':')?;
        let token = self.take_while(|c| !c.is_whitespace());
        if token.is_empty() {
            return None;
        }
        Some(token)
    }
}
