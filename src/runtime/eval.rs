//! Source evaluation behind `eval_pv`.
//!
//! Understands literals (numbers, quoted strings, `qw//`, `undef`), array
//! and hash constructors, references, global variables with `my`-style
//! assignment, sub calls, class and object method calls, element access
//! through `->[..]` and `->{..}`, and the builtins `die`, `bless`, `ref`,
//! `defined` and `require`. Statements are separated by `;` and the last
//! one supplies the result. There are no operators and no control flow.

use super::interp::{G_LIST, G_SCALAR, G_VOID, GV_ADD, Interpreter};
use super::numeric::{self, Numeric};
use super::sv::{SVT_PVAV, SVT_PVHV, SvPtr};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Scalar(String),
    Array(String),
    Number(String),
    Str(String),
    Words(Vec<String>),
    Punct(&'static str),
}

const PUNCTS: [&str; 13] = [
    "=>", "->", "(", ")", "[", "]", "{", "}", ",", ";", "=", "\\", "-",
];

/// Evaluate `source`, returning the values of its last statement. The
/// values are borrowed or mortal.
///
/// # Safety
/// Every value on the interpreter stack must be live.
pub(crate) unsafe fn run(perl: &Interpreter, source: &str, gimme: u32) -> Vec<SvPtr> {
    let tokens = tokenize(perl, source);
    let statements = split_statements(tokens);
    let last = statements.len().saturating_sub(1);
    let mut result = Vec::new();
    for (index, tokens) in statements.into_iter().enumerate() {
        let want = if index == last { gimme } else { G_VOID };
        let mut evaluator = Evaluator {
            perl,
            tokens,
            pos: 0,
        };
        result = evaluator.statement(want);
    }
    result
}

fn syntax_error(perl: &Interpreter, near: &str) -> ! {
    perl.croak(&format!("syntax error at (eval) line 1, near \"{near}\"\n"))
}

fn tokenize(perl: &Interpreter, source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let ident_start = |c: char| c.is_alphabetic() || c == '_';
    let near = |i: usize| chars[i..].iter().take(12).collect::<String>();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if ident_start(c) {
            let (word, next) = read_ident(&chars, i);
            i = next;
            if word == "qw" {
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if let Some(close) = chars.get(j).and_then(|&open| closing_delimiter(open)) {
                    let start = j + 1;
                    let Some(len) = chars[start..].iter().position(|&c| c == close) else {
                        perl.croak("Can't find string terminator for qw\n");
                    };
                    let body: String = chars[start..start + len].iter().collect();
                    tokens.push(Token::Words(
                        body.split_whitespace().map(str::to_string).collect(),
                    ));
                    i = start + len + 1;
                    continue;
                }
            }
            tokens.push(Token::Ident(word));
        } else if c == '$' || c == '@' {
            let sigil = c;
            let name = match chars.get(i + 1) {
                Some(&'@') if sigil == '$' => {
                    i += 2;
                    "@".to_string()
                }
                Some(&d) if d.is_ascii_digit() && sigil == '$' => {
                    i += 2;
                    d.to_string()
                }
                Some(&s) if ident_start(s) || s == ':' => {
                    let (word, next) = read_ident(&chars, i + 1);
                    i = next;
                    word
                }
                _ => syntax_error(perl, &near(i)),
            };
            tokens.push(if sigil == '$' {
                Token::Scalar(name)
            } else {
                Token::Array(name)
            });
        } else if c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit))
        {
            let (number, next) = read_number(&chars, i);
            i = next;
            tokens.push(Token::Number(number));
        } else if c == '\'' || c == '"' {
            let (text, next) = read_string(perl, &chars, i);
            i = next;
            tokens.push(Token::Str(text));
        } else if let Some(punct) = PUNCTS.iter().find(|p| {
            p.chars()
                .enumerate()
                .all(|(k, pc)| chars.get(i + k) == Some(&pc))
        }) {
            tokens.push(Token::Punct(punct));
            i += punct.len();
        } else {
            syntax_error(perl, &near(i));
        }
    }
    tokens
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    let mut word = String::new();
    loop {
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
            word.push(chars[i]);
            i += 1;
        }
        if chars.get(i) == Some(&':')
            && chars.get(i + 1) == Some(&':')
            && chars
                .get(i + 2)
                .is_some_and(|&c| c.is_alphabetic() || c == '_')
        {
            word.push_str("::");
            i += 2;
        } else {
            break;
        }
    }
    (word, i)
}

fn read_number(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    let mut text = String::new();
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x' | 'X')) {
        i += 2;
        while i < chars.len() && (chars[i].is_ascii_hexdigit() || chars[i] == '_') {
            if chars[i] != '_' {
                text.push(chars[i]);
            }
            i += 1;
        }
        let value = u64::from_str_radix(&text, 16).unwrap_or(u64::MAX);
        return (value.to_string(), i);
    }
    let digits = |i: &mut usize, text: &mut String| {
        while *i < chars.len() && (chars[*i].is_ascii_digit() || chars[*i] == '_') {
            if chars[*i] != '_' {
                text.push(chars[*i]);
            }
            *i += 1;
        }
    };
    digits(&mut i, &mut text);
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
        text.push('.');
        i += 1;
        digits(&mut i, &mut text);
    }
    if matches!(chars.get(i), Some('e' | 'E')) {
        let mut j = i + 1;
        let mut exponent = String::from("e");
        if let Some(&sign @ ('+' | '-')) = chars.get(j) {
            exponent.push(sign);
            j += 1;
        }
        if chars.get(j).is_some_and(char::is_ascii_digit) {
            i = j;
            text.push_str(&exponent);
            digits(&mut i, &mut text);
        }
    }
    (text, i)
}

fn read_string(perl: &Interpreter, chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut i = start + 1;
    let mut text = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return (text, i + 1);
        }
        if c == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            i += 2;
            if quote == '\'' {
                if escaped != '\\' && escaped != '\'' {
                    text.push('\\');
                }
                text.push(escaped);
                continue;
            }
            match escaped {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '0' => text.push('\0'),
                'a' => text.push('\u{7}'),
                'e' => text.push('\u{1b}'),
                'x' => {
                    let (code, next) = if chars.get(i) == Some(&'{') {
                        let len = chars[i + 1..].iter().position(|&c| c == '}').unwrap_or(0);
                        let hex: String = chars[i + 1..i + 1 + len].iter().collect();
                        (u32::from_str_radix(&hex, 16).unwrap_or(0), i + len + 2)
                    } else {
                        let len = chars[i..]
                            .iter()
                            .take(2)
                            .take_while(|c| c.is_ascii_hexdigit())
                            .count();
                        let hex: String = chars[i..i + len].iter().collect();
                        (u32::from_str_radix(&hex, 16).unwrap_or(0), i + len)
                    };
                    text.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    i = next;
                }
                other => text.push(other),
            }
            continue;
        }
        text.push(c);
        i += 1;
    }
    perl.croak("Can't find string terminator\n")
}

fn closing_delimiter(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        '<' => Some('>'),
        '/' | '|' | '!' => Some(open),
        _ => None,
    }
}

fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut statements = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;
    for token in tokens {
        match token {
            Token::Punct("(" | "[" | "{") => depth += 1,
            Token::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
            Token::Punct(";") if depth == 0 => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
                continue;
            }
            _ => {}
        }
        current.push(token);
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

struct Evaluator<'a> {
    perl: &'a Interpreter,
    tokens: Vec<Token>,
    pos: usize,
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) {
        if !self.eat(punct) {
            self.fail();
        }
    }

    fn at_close(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Punct(")" | "]" | "}" | ";"))
        )
    }

    fn fail(&self) -> ! {
        let near = match self.peek() {
            Some(Token::Ident(word)) => word.clone(),
            Some(Token::Scalar(name)) => format!("${name}"),
            Some(Token::Array(name)) => format!("@{name}"),
            Some(Token::Number(text)) => text.clone(),
            Some(Token::Str(text)) => format!("'{text}'"),
            Some(Token::Words(_)) => "qw".to_string(),
            Some(Token::Punct(p)) => p.to_string(),
            None => "end of input".to_string(),
        };
        syntax_error(self.perl, &near)
    }

    fn mortal(&self, sv: SvPtr) -> SvPtr {
        self.perl.sv_2mortal(sv)
    }

    fn undef(&self) -> SvPtr {
        self.mortal(self.perl.new_sv())
    }

    fn global_sv(&self, name: &str) -> SvPtr {
        self.perl.get_sv(name, GV_ADD).unwrap_or_else(|| self.undef())
    }

    fn statement(&mut self, want: u32) -> Vec<SvPtr> {
        let mut values = self.item(want);
        if self.eat(",") || self.eat("=>") {
            values.extend(self.comma_items());
        }
        if self.peek().is_some() {
            self.fail();
        }
        values
    }

    fn comma_items(&mut self) -> Vec<SvPtr> {
        let mut values = Vec::new();
        while !self.at_close() {
            values.extend(self.item(G_LIST));
            if !(self.eat(",") || self.eat("=>")) {
                break;
            }
        }
        values
    }

    fn list_until(&mut self, close: &str) -> Vec<SvPtr> {
        let values = self.comma_items();
        self.expect(close);
        values
    }

    fn item(&mut self, want: u32) -> Vec<SvPtr> {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == "my") {
            self.pos += 1;
        }
        if let (Some(Token::Scalar(name)), Some(Token::Punct("="))) = (self.peek(), self.peek_at(1)) {
            let name = name.clone();
            self.pos += 2;
            let value = self.item(G_SCALAR).last().copied();
            let perl = self.perl;
            let var = self.global_sv(&name);
            match value {
                Some(value) => unsafe { perl.sv_setsv(var, value) },
                None => unsafe { perl.sv_set_undef(var) },
            }
            return vec![var];
        }
        let base = self.term(want);
        self.postfix(base, want)
    }

    fn postfix(&mut self, mut values: Vec<SvPtr>, want: u32) -> Vec<SvPtr> {
        while self.eat("->") {
            let perl = self.perl;
            let invocant = values.last().copied().unwrap_or_else(|| self.undef());
            if self.eat("[") {
                let index = self.list_until("]");
                let index = index.first().map(|sv| unsafe { perl.sv_2iv(*sv) }).unwrap_or(0);
                let av = self.referent(invocant, SVT_PVAV, "ARRAY");
                let element = unsafe { perl.av_fetch(av, index as isize, false) };
                values = vec![element.unwrap_or_else(|| self.undef())];
            } else if self.eat("{") {
                let key = match (self.peek(), self.peek_at(1)) {
                    (Some(Token::Ident(word)), Some(Token::Punct("}"))) => {
                        let key = word.clone().into_bytes();
                        self.pos += 2;
                        key
                    }
                    _ => {
                        let key = self.list_until("}");
                        match key.first() {
                            Some(sv) => unsafe { perl.sv_2pv(*sv) }.0,
                            None => Vec::new(),
                        }
                    }
                };
                let hv = self.referent(invocant, SVT_PVHV, "HASH");
                let element = unsafe { perl.hv_fetch(hv, &key, false) };
                values = vec![element.unwrap_or_else(|| self.undef())];
            } else if let Some(Token::Ident(method)) = self.peek() {
                let method = method.clone();
                self.pos += 1;
                let args = if self.eat("(") {
                    self.list_until(")")
                } else {
                    Vec::new()
                };
                let mut call = vec![invocant];
                call.extend(args);
                values = self.call(&method, call, want, true);
            } else {
                self.fail();
            }
        }
        values
    }

    fn referent(&self, sv: SvPtr, tag: u32, kind: &str) -> SvPtr {
        let perl = self.perl;
        match unsafe { perl.sv_rv(sv) } {
            Some(target) if unsafe { perl.sv_type(target) } == tag => target,
            _ => perl.croak(&format!("Not an {kind} reference\n")),
        }
    }

    fn term(&mut self, want: u32) -> Vec<SvPtr> {
        let perl = self.perl;
        let Some(token) = self.advance() else {
            self.pos -= 1;
            self.fail();
        };
        match token {
            Token::Number(text) => vec![self.number(&text, false)],
            Token::Punct("-") => match self.advance() {
                Some(Token::Number(text)) => vec![self.number(&text, true)],
                _ => {
                    self.pos -= 1;
                    self.fail()
                }
            },
            Token::Str(text) => vec![self.mortal(perl.new_sv_str(&text))],
            Token::Words(words) => words
                .iter()
                .map(|word| self.mortal(perl.new_sv_str(word)))
                .collect(),
            Token::Punct("\\") => self.reference(),
            Token::Punct("[") => {
                let items = self.list_until("]");
                let av = perl.new_av();
                for item in items {
                    unsafe { perl.av_push(av, perl.new_sv_sv(item)) };
                }
                vec![self.mortal(perl.new_rv_noinc(av))]
            }
            Token::Punct("{") => {
                let items = self.list_until("}");
                let hv = perl.new_hv();
                for pair in items.chunks(2) {
                    let (key, _) = unsafe { perl.sv_2pv(pair[0]) };
                    let value = match pair.get(1) {
                        Some(value) => unsafe { perl.new_sv_sv(*value) },
                        None => perl.new_sv(),
                    };
                    if let Some(old) = unsafe { perl.hv_store(hv, &key, value) } {
                        unsafe { perl.sv_refcnt_dec(old) };
                    }
                }
                vec![self.mortal(perl.new_rv_noinc(hv))]
            }
            Token::Punct("(") => self.list_until(")"),
            Token::Scalar(name) => vec![self.global_sv(&name)],
            Token::Array(name) => {
                let items = match perl.get_av(&name, 0) {
                    Some(av) => {
                        let len = unsafe { perl.av_len(av) };
                        (0..len)
                            .map(|index| {
                                unsafe { perl.av_fetch(av, index as isize, false) }
                                    .unwrap_or_else(|| self.undef())
                            })
                            .collect()
                    }
                    None => Vec::new(),
                };
                if want == G_SCALAR {
                    vec![self.mortal(perl.new_sv_iv(items.len() as i64))]
                } else {
                    items
                }
            }
            Token::Ident(word) => self.bareword(word, want),
            Token::Punct(_) => {
                self.pos -= 1;
                self.fail()
            }
        }
    }

    fn number(&self, text: &str, negative: bool) -> SvPtr {
        let perl = self.perl;
        let signed = if negative {
            format!("-{text}")
        } else {
            text.to_string()
        };
        let sv = match numeric::grok_number(signed.as_bytes()) {
            Some(Numeric::Int(value)) => perl.new_sv_iv(value),
            Some(Numeric::UInt(value)) => perl.new_sv_uv(value),
            Some(Numeric::Float(value)) => perl.new_sv_nv(value),
            None => syntax_error(perl, text),
        };
        self.mortal(sv)
    }

    fn reference(&mut self) -> Vec<SvPtr> {
        let perl = self.perl;
        if let Some(Token::Array(name)) = self.peek() {
            let Some(av) = perl.get_av(name, GV_ADD) else {
                self.fail();
            };
            self.pos += 1;
            return vec![self.mortal(unsafe { perl.new_rv_inc(av) })];
        }
        let targets = self.term(G_LIST);
        targets
            .into_iter()
            .map(|target| self.mortal(unsafe { perl.new_rv_inc(target) }))
            .collect()
    }

    fn call_args(&mut self) -> Vec<SvPtr> {
        if self.eat("(") {
            self.list_until(")")
        } else {
            self.comma_items()
        }
    }

    fn bareword(&mut self, word: String, want: u32) -> Vec<SvPtr> {
        let perl = self.perl;
        if matches!(self.peek(), Some(Token::Punct("=>" | "->"))) {
            return vec![self.mortal(perl.new_sv_str(&word))];
        }
        match word.as_str() {
            "undef" => {
                if self.eat("(") {
                    self.expect(")");
                }
                vec![self.undef()]
            }
            "die" => {
                let args = self.call_args();
                self.die(args)
            }
            "bless" => {
                let args = self.call_args();
                let Some(&target) = args.first() else {
                    perl.croak("Not enough arguments for bless\n");
                };
                let class = match args.get(1) {
                    Some(class) => unsafe { perl.sv_2pv_string(*class) },
                    None => "main".to_string(),
                };
                unsafe { perl.sv_bless(target, &class) };
                vec![target]
            }
            "ref" => {
                let args = self.call_args();
                let kind = args
                    .first()
                    .and_then(|sv| unsafe { perl.sv_rv(*sv) })
                    .map(|target| unsafe { perl.sv_reftype(target, true) })
                    .unwrap_or_default();
                vec![self.mortal(perl.new_sv_str(&kind))]
            }
            "defined" => {
                let args = self.call_args();
                let defined = args.first().is_some_and(|sv| unsafe { perl.sv_ok(*sv) });
                vec![self.mortal(perl.new_sv_bool(defined))]
            }
            "require" => {
                let module = match self.advance() {
                    Some(Token::Ident(module)) => module,
                    Some(Token::Str(module)) => module,
                    _ => {
                        self.pos -= 1;
                        self.fail()
                    }
                };
                perl.require_module(&module);
                vec![self.mortal(perl.new_sv_bool(true))]
            }
            _ => {
                if self.eat("(") {
                    let args = self.list_until(")");
                    self.call(&word, args, want, false)
                } else if perl.get_cv(&word, 0).is_some() {
                    self.call(&word, Vec::new(), want, false)
                } else {
                    vec![self.mortal(perl.new_sv_str(&word))]
                }
            }
        }
    }

    fn die(&self, args: Vec<SvPtr>) -> ! {
        let perl = self.perl;
        if let [single] = args[..] {
            if unsafe { perl.sv_rok(single) } {
                unsafe { perl.croak_sv(single) }
            }
        }
        let mut message: String = args
            .iter()
            .map(|sv| unsafe { perl.sv_2pv_string(*sv) })
            .collect();
        if message.is_empty() {
            message.push_str("Died");
        }
        if !message.ends_with('\n') {
            message.push_str(" at (eval) line 1.\n");
        }
        perl.croak(&message)
    }

    fn call(&self, name: &str, args: Vec<SvPtr>, want: u32, method: bool) -> Vec<SvPtr> {
        let perl = self.perl;
        let mark = perl.stack_len();
        perl.push_mark();
        for arg in args {
            perl.stack_push(arg);
        }
        let count = unsafe {
            if method {
                perl.call_method(name, want)
            } else {
                perl.call_pv(name, want)
            }
        };
        let results = perl.stack_slice(perl.stack_len() - count);
        perl.stack_truncate(mark);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp;

    fn evaluate<R>(source: &str, gimme: u32, check: impl FnOnce(&Interpreter, Vec<SvPtr>) -> R) -> R {
        interp::sys_init();
        let perl = Interpreter::alloc();
        unsafe {
            Interpreter::construct(perl);
            let this = perl.as_ref();
            this.enter();
            this.savetmps();
            let count = this.eval_pv(source, gimme);
            let values = this.stack_slice(this.stack_len() - count);
            let result = check(this, values);
            this.stack_truncate(0);
            this.freetmps();
            this.leave();
            Interpreter::destruct(perl);
            Interpreter::free(perl);
            result
        }
    }

    #[test]
    fn test_literal_flags() {
        evaluate("42", G_SCALAR, |perl, values| unsafe {
            assert!(perl.sv_iok(values[0]));
            assert!(!perl.sv_pok(values[0]));
        });
        evaluate("'42'", G_SCALAR, |perl, values| unsafe {
            assert!(perl.sv_pok(values[0]));
            assert!(!perl.sv_iok(values[0]));
        });
        evaluate("42.5", G_SCALAR, |perl, values| unsafe {
            assert!(perl.sv_nok(values[0]));
        });
        evaluate("10000000000000000000", G_SCALAR, |perl, values| unsafe {
            assert!(perl.sv_isuv(values[0]));
        });
        evaluate("-7", G_SCALAR, |perl, values| unsafe {
            assert_eq!(perl.sv_2iv(values[0]), -7);
        });
    }

    #[test]
    fn test_containers_and_element_access() {
        evaluate(
            "my $h = { a => [1, 2, 3], 'b' => \"x\\ty\" }; $h->{a}->[2]",
            G_SCALAR,
            |perl, values| unsafe {
                assert_eq!(perl.sv_2iv(values[0]), 3);
            },
        );
        evaluate("$x = { k => 'v' }; $x->{k}", G_SCALAR, |perl, values| unsafe {
            assert_eq!(perl.sv_2pv_string(values[0]), "v");
        });
    }

    #[test]
    fn test_list_and_scalar_context() {
        evaluate("qw/a b c/", G_LIST, |_, values| assert_eq!(values.len(), 3));
        evaluate("qw/a b c/", G_SCALAR, |perl, values| unsafe {
            assert_eq!(values.len(), 1);
            assert_eq!(perl.sv_2pv_string(values[0]), "c");
        });
        evaluate("(1, 2, 3)", G_LIST, |_, values| assert_eq!(values.len(), 3));
        evaluate("1; 2", G_LIST, |perl, values| unsafe {
            assert_eq!(values.len(), 1);
            assert_eq!(perl.sv_2iv(values[0]), 2);
        });
    }

    #[test]
    fn test_die_sets_errsv() {
        evaluate("die 'oops'", G_SCALAR, |perl, values| unsafe {
            assert!(!perl.sv_ok(values[0]));
            assert_eq!(
                perl.sv_2pv_string(perl.errsv()),
                "oops at (eval) line 1.\n"
            );
        });
        evaluate("die \"done\\n\"", G_SCALAR, |perl, _| unsafe {
            assert_eq!(perl.sv_2pv_string(perl.errsv()), "done\n");
        });
        evaluate("1 +", G_SCALAR, |perl, _| unsafe {
            assert!(perl.sv_2pv_string(perl.errsv()).starts_with("syntax error"));
        });
    }

    #[test]
    fn test_bless_and_ref() {
        evaluate("ref(bless {}, 'Point')", G_SCALAR, |perl, values| unsafe {
            assert_eq!(perl.sv_2pv_string(values[0]), "Point");
        });
        evaluate("ref([])", G_SCALAR, |perl, values| unsafe {
            assert_eq!(perl.sv_2pv_string(values[0]), "ARRAY");
        });
        evaluate("require Missing::Module", G_SCALAR, |perl, _| unsafe {
            assert!(
                perl.sv_2pv_string(perl.errsv())
                    .starts_with("Can't locate Missing/Module.pm")
            );
        });
    }
}
