//! Local arithmetic evaluation for the `math` tool.
//!
//! Supports `+ - * / % ^`, unary signs, postfix `!`, parentheses, the
//! constants `pi`, `e`, `tau` and a handful of functions.

use async_trait::async_trait;
use serde_json::{json, Number, Value};
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolError, ToolHandler, ToolOutcome};

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("math", "数学计算", Category::Basic, "数学表达式计算").param(
        ParamSpec::text("expr")
            .required()
            .missing_message("缺少表达式 expr"),
    )
}

pub struct MathTool;

#[async_trait]
impl ToolHandler for MathTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let expr = args.str("expr")?;
        let value = evaluate(expr).map_err(|e| ToolError::invalid("expr", e))?;
        Ok(json!({ "value": to_json_number(value)? }))
    }
}

/// Integral results come back as JSON integers, so `2+2` is `4`, not `4.0`.
fn to_json_number(value: f64) -> ToolOutcome<Value> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        return Ok(Value::Number((value as i64).into()));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ToolError::invalid("expr", "结果不是有限数值"))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent: 1e3, 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("无效数字: {text}"))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '!' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(format!("无法识别的字符: {other}")),
        }
    }
    Ok(tokens)
}

// Every nesting path (parens, calls, sign chains, exponents) re-enters `unary`.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        while let Some(op) = self.eat_op(&['*', '/', '%']) {
            let rhs = self.unary()?;
            acc = match op {
                '*' => acc * rhs,
                '/' => acc / rhs,
                _ => acc.rem_euclid(rhs),
            };
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("表达式嵌套过深".to_string());
        }
        self.depth += 1;
        let value = match self.eat_op(&['-', '+']) {
            Some('-') => self.unary().map(|v| -v),
            Some(_) => self.unary(),
            None => self.power(),
        };
        self.depth -= 1;
        value
    }

    // Right-associative; the exponent may carry its own sign.
    fn power(&mut self) -> Result<f64, String> {
        let base = self.postfix()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<f64, String> {
        let mut value = self.primary()?;
        while self.eat_op(&['!']).is_some() {
            value = factorial(value)?;
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("缺少右括号".to_string()),
                }
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.call_args()?;
                    apply(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(other) => Err(format!("意外的符号: {other:?}")),
            None => Err("表达式不完整".to_string()),
        }
    }

    fn call_args(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err("函数参数缺少右括号".to_string()),
            }
        }
    }
}

fn factorial(n: f64) -> Result<f64, String> {
    if n < 0.0 || n.fract() != 0.0 || n > 170.0 {
        return Err(format!("阶乘仅支持 0 到 170 的整数: {n}"));
    }
    Ok((1..=n as u32).fold(1.0, |acc, k| acc * f64::from(k)))
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" | "PI" => Ok(std::f64::consts::PI),
        "e" | "E" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        _ => Err(format!("未定义的符号: {name}")),
    }
}

fn apply(name: &str, args: &[f64]) -> Result<f64, String> {
    let one = |f: fn(f64) -> f64| match args {
        [x] => Ok(f(*x)),
        _ => Err(format!("函数 {name} 需要 1 个参数")),
    };
    match name {
        "sqrt" => one(f64::sqrt),
        "cbrt" => one(f64::cbrt),
        "abs" => one(f64::abs),
        "sin" => one(f64::sin),
        "cos" => one(f64::cos),
        "tan" => one(f64::tan),
        "asin" => one(f64::asin),
        "acos" => one(f64::acos),
        "atan" => one(f64::atan),
        "exp" => one(f64::exp),
        "ln" => one(f64::ln),
        "log10" => one(f64::log10),
        "log2" => one(f64::log2),
        "floor" => one(f64::floor),
        "ceil" => one(f64::ceil),
        "round" => one(f64::round),
        "log" => match args {
            [x] => Ok(x.ln()),
            [x, base] => Ok(x.log(*base)),
            _ => Err("函数 log 需要 1 或 2 个参数".to_string()),
        },
        "pow" => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err("函数 pow 需要 2 个参数".to_string()),
        },
        "min" | "max" | "sum" | "mean" if args.is_empty() => {
            Err(format!("函数 {name} 至少需要 1 个参数"))
        }
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "sum" => Ok(args.iter().sum()),
        "mean" => Ok(args.iter().sum::<f64>() / args.len() as f64),
        _ => Err(format!("未定义的函数: {name}")),
    }
}

pub fn evaluate(input: &str) -> Result<f64, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("表达式为空".to_string());
    }
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("多余的符号: {extra:?}"));
    }
    if !value.is_finite() {
        return Err("结果不是有限数值".to_string());
    }
    Ok(value)
}
