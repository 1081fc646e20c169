//! Calculator 工具：安全的算术表达式求值
//!
//! 只接受数字、运算符、括号、白名单函数与常量，不执行任何代码。
//! 运算符优先级与常见脚本语言一致：`**`（`^` 同义）右结合且高于一元负号，`//` 为向下取整除法，`%` 取模结果与除数同号。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::ToolOutput;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::Tool;

/// calculator 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// A mathematical expression to evaluate (e.g. "2 + 2", "sqrt(16)", "sin(pi/2)")
    pub expression: String,
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Calculate mathematical expressions safely. Supports + - * / // % ** (or ^), parentheses, \
         abs, round, min, max, sum, pow, sqrt, sin, cos, tan, log, log10, exp and the constants pi and e."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CalculatorArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec![
            "Calculate 15 * 7 + 23".to_string(),
            "What is the square root of 144?".to_string(),
            "sin(pi/2) + cos(0)".to_string(),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let args: CalculatorArgs = parse_args(args)?;
        let text = match evaluate(&args.expression) {
            Ok(value) => format!("Result: {}", format_number(value)),
            Err(e) => format!("Error calculating '{}': {e}", args.expression),
        };
        Ok(ToolOutput::text(text))
    }
}

/// 求值入口
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("invalid syntax".to_string());
    }
    Ok(value)
}

/// 整数值不带小数部分输出
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(&'static str),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                i += 1;
            }
            // 科学计数法 1e3 / 2.5E-4
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
            let literal: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{literal}'"))?;
            tokens.push(Token::Num(value));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let next = chars.get(i + 1).copied();
        let (op, width) = match (c, next) {
            ('*', Some('*')) => ("**", 2),
            ('/', Some('/')) => ("//", 2),
            ('+', _) => ("+", 1),
            ('-', _) => ("-", 1),
            ('*', _) => ("*", 1),
            ('/', _) => ("/", 1),
            ('%', _) => ("%", 1),
            ('^', _) => ("**", 1),
            ('(', _) => ("(", 1),
            (')', _) => (")", 1),
            ('[', _) => ("[", 1),
            (']', _) => ("]", 1),
            (',', _) => (",", 1),
            _ => return Err(format!("invalid character '{c}'")),
        };
        tokens.push(Token::Op(op));
        i += width;
    }
    Ok(tokens)
}

/// 嵌套上限：括号、一元符号与函数调用都计入
const MAX_NESTING: usize = 200;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err("expression too deeply nested".to_string());
        }
        Ok(())
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), String> {
        if self.eat(op) {
            Ok(())
        } else {
            Err("invalid syntax".to_string())
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat("+") {
                value += self.term()?;
            } else if self.eat("-") {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            let op = match self.peek_op() {
                Some(op @ ("*" | "/" | "//" | "%")) => op,
                _ => return Ok(value),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                "*" => value * rhs,
                _ if rhs == 0.0 => {
                    return Err(match op {
                        "%" => "modulo by zero".to_string(),
                        _ => "division by zero".to_string(),
                    })
                }
                "/" => value / rhs,
                "//" => (value / rhs).floor(),
                _ => value - rhs * (value / rhs).floor(),
            };
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        self.enter()?;
        let value = if self.eat("-") {
            -self.unary()?
        } else if self.eat("+") {
            self.unary()?
        } else {
            self.power()?
        };
        self.depth -= 1;
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if self.eat("**") {
            // 右结合，指数允许一元符号：2 ** -1
            let exponent = self.unary()?;
            if base == 0.0 && exponent < 0.0 {
                return Err("zero cannot be raised to a negative power".to_string());
            }
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Token::Op("(")) => {
                self.pos += 1;
                self.enter()?;
                let value = self.expr()?;
                self.expect(")")?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if self.eat("(") {
                    let args = self.arguments()?;
                    call_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            _ => Err("invalid syntax".to_string()),
        }
    }

    /// 函数参数；`[a, b]` 列表字面量会被展开
    fn arguments(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        self.enter()?;
        loop {
            if self.eat("[") {
                if !self.eat("]") {
                    loop {
                        args.push(self.expr()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
            } else {
                args.push(self.expr()?);
            }
            if self.eat(")") {
                self.depth -= 1;
                return Ok(args);
            }
            self.expect(",")?;
        }
    }
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        _ => Err(format!("name '{name}' is not defined")),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, String> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{name}() takes exactly {n} argument(s) ({} given)", args.len()))
        }
    };
    let domain = |ok: bool, v: f64| if ok { Ok(v) } else { Err("math domain error".to_string()) };

    match name {
        "abs" => arity(1).map(|_| args[0].abs()),
        "round" => match args {
            [x] => Ok(round_half_even(*x)),
            [x, digits] => {
                let factor = 10f64.powi(*digits as i32);
                Ok(round_half_even(x * factor) / factor)
            }
            _ => Err(format!("round() takes 1 or 2 arguments ({} given)", args.len())),
        },
        "min" | "max" => {
            if args.is_empty() {
                return Err(format!("{name}() arg is an empty sequence"));
            }
            let pick: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            Ok(args.iter().copied().fold(args[0], pick))
        }
        "sum" => Ok(args.iter().sum()),
        "pow" => arity(2).map(|_| args[0].powf(args[1])),
        "sqrt" => arity(1).and_then(|_| domain(args[0] >= 0.0, args[0].sqrt())),
        "sin" => arity(1).map(|_| args[0].sin()),
        "cos" => arity(1).map(|_| args[0].cos()),
        "tan" => arity(1).map(|_| args[0].tan()),
        "exp" => arity(1).map(|_| args[0].exp()),
        "log10" => arity(1).and_then(|_| domain(args[0] > 0.0, args[0].log10())),
        "log" => match args {
            [x] => domain(*x > 0.0, x.ln()),
            [x, base] => domain(*x > 0.0 && *base > 0.0 && *base != 1.0, x.log(*base)),
            _ => Err(format!("log() takes 1 or 2 arguments ({} given)", args.len())),
        },
        _ => Err(format!("name '{name}' is not defined")),
    }
}

/// 银行家舍入（.5 取偶）
fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(s: &str) -> f64 {
        evaluate(s).unwrap()
    }

    #[test]
    fn test_basic_arithmetic() {
        assert_eq!(eval("2 + 2"), 4.0);
        assert_eq!(eval("15 * 7 + 23"), 128.0);
        assert_eq!(eval("(1 + 2) * 3"), 9.0);
        assert_eq!(eval("10 / 4"), 2.5);
        assert_eq!(eval("7 // 2"), 3.0);
        assert_eq!(eval("-7 // 2"), -4.0);
        assert_eq!(eval("-7 % 3"), 2.0);
    }

    #[test]
    fn test_power_precedence() {
        assert_eq!(eval("2 ** 3 ** 2"), 512.0);
        assert_eq!(eval("-2 ** 2"), -4.0);
        assert_eq!(eval("2 ^ 10"), 1024.0);
        assert_eq!(eval("2 ** -1"), 0.5);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(eval("sqrt(16)"), 4.0);
        assert!((eval("sin(pi/2)") - 1.0).abs() < 1e-12);
        assert_eq!(eval("max(1, 5, 3)"), 5.0);
        assert_eq!(eval("sum([1, 2, 3])"), 6.0);
        assert_eq!(eval("round(2.5)"), 2.0);
        assert_eq!(eval("round(3.14159, 2)"), 3.14);
        assert!((eval("log(e)") - 1.0).abs() < 1e-12);
        assert_eq!(eval("log10(1000)"), 3.0);
        assert_eq!(eval("1e3 + 1"), 1001.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1 / 0").unwrap_err(), "division by zero");
        assert_eq!(evaluate("sqrt(-1)").unwrap_err(), "math domain error");
        assert!(evaluate("__import__('os')").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("foo").unwrap_err().contains("not defined"));
        assert!(evaluate("").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        assert_eq!(eval(&format!("{}1{}", "(".repeat(50), ")".repeat(50))), 1.0);
        assert_eq!(eval(&format!("{}1", "-".repeat(50))), 1.0);
        assert_eq!(eval("sqrt(sqrt(sqrt(256)))"), 2.0);

        let deep_parens = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert_eq!(
            evaluate(&deep_parens).unwrap_err(),
            "expression too deeply nested"
        );
        let deep_calls = format!("{}1{}", "abs(".repeat(20_000), ")".repeat(20_000));
        assert_eq!(
            evaluate(&deep_calls).unwrap_err(),
            "expression too deeply nested"
        );
    }

    #[tokio::test]
    async fn test_deep_nesting_is_error_text() {
        for expression in [
            format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000)),
            format!("{}1", "-".repeat(200_000)),
        ] {
            let out = CalculatorTool
                .execute(json!({ "expression": expression }))
                .await
                .unwrap();
            let ToolOutput::Text(text) = out else {
                panic!("expected text output");
            };
            assert!(text.starts_with("Error calculating '"));
            assert!(text.ends_with("expression too deeply nested"));
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[tokio::test]
    async fn test_tool_output() {
        let out = CalculatorTool
            .execute(json!({"expression": "2 + 2"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("Result: 4"));

        let out = CalculatorTool
            .execute(json!({"expression": "1/0"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            ToolOutput::text("Error calculating '1/0': division by zero")
        );

        assert!(CalculatorTool.execute(json!({})).await.is_err());
    }
}
