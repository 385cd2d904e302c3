//! Inline `style="…"` declaration-list parsing.
//!
//! Lenient by design: unknown properties and malformed values are
//! skipped, matching how reading engines treat book CSS.

use cssparser::{
    ParseError, Parser, ParserInput, RuleBodyItemParser, RuleBodyParser, Token,
};

use crate::style::types::{
    ComputedStyle, Display, Float, Length, TextAlign, VerticalAlign, WhiteSpace,
};

/// Parses an inline declaration list, applying recognized properties on
/// top of `base` (usually the inherited/derived style).
pub fn apply_inline_style(base: &ComputedStyle, css: &str) -> ComputedStyle {
    let mut style = base.clone();
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut decl_parser = InlineDeclParser { style: &mut style };
    for result in RuleBodyParser::new(&mut parser, &mut decl_parser) {
        // Ignore errors - lenient parsing
        let _ = result;
    }
    style
}

struct InlineDeclParser<'a> {
    style: &'a mut ComputedStyle,
}

impl<'i> cssparser::AtRuleParser<'i> for InlineDeclParser<'_> {
    type Prelude = ();
    type AtRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        _name: cssparser::CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        Err(input.new_custom_error(()))
    }

    fn parse_block<'t>(
        &mut self,
        _prelude: Self::Prelude,
        _start: &cssparser::ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, ParseError<'i, Self::Error>> {
        Err(input.new_custom_error(()))
    }
}

impl<'i> cssparser::QualifiedRuleParser<'i> for InlineDeclParser<'_> {
    type Prelude = ();
    type QualifiedRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        Err(input.new_custom_error(()))
    }

    fn parse_block<'t>(
        &mut self,
        _prelude: Self::Prelude,
        _start: &cssparser::ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
        Err(input.new_custom_error(()))
    }
}

impl<'i> cssparser::DeclarationParser<'i> for InlineDeclParser<'_> {
    type Declaration = ();
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: cssparser::CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _start: &cssparser::ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        match &*name.to_ascii_lowercase() {
            "display" => {
                if let Some(v) = parse_keyword(input, parse_display) {
                    self.style.display = v;
                }
            }
            "float" => {
                if let Some(v) = parse_keyword(input, parse_float) {
                    self.style.float = v;
                }
            }
            "white-space" => {
                if let Some(v) = parse_keyword(input, parse_white_space) {
                    self.style.white_space = v;
                }
            }
            "text-align" => {
                if let Some(v) = parse_keyword(input, parse_text_align) {
                    self.style.text_align = v;
                }
            }
            "vertical-align" => {
                if let Some(v) = parse_keyword(input, parse_vertical_align) {
                    self.style.vertical_align = v;
                }
            }
            "width" => {
                if let Some(v) = parse_length(input) {
                    self.style.width = v;
                }
            }
            _ => {}
        }
        // Swallow the rest of the value (e.g. !important) so the list
        // parser can continue with the next declaration.
        while input.next().is_ok() {}
        Ok(())
    }
}

impl<'i> RuleBodyItemParser<'i, (), ()> for InlineDeclParser<'_> {
    fn parse_declarations(&self) -> bool {
        true
    }
    fn parse_qualified(&self) -> bool {
        false
    }
}

fn parse_keyword<'i, T>(
    input: &mut Parser<'i, '_>,
    map: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let ident = input.expect_ident().ok()?.to_ascii_lowercase();
    map(&ident)
}

fn parse_display(v: &str) -> Option<Display> {
    Some(match v {
        "inline" => Display::Inline,
        "block" => Display::Block,
        "none" => Display::None,
        "run-in" => Display::RunIn,
        "inline-block" => Display::InlineBlock,
        "inline-table" => Display::InlineTable,
        "list-item" => Display::ListItem,
        "ruby" => Display::Ruby,
        "table" => Display::Table,
        "table-row-group" => Display::TableRowGroup,
        "table-header-group" => Display::TableHeaderGroup,
        "table-footer-group" => Display::TableFooterGroup,
        "table-row" => Display::TableRow,
        "table-column-group" => Display::TableColumnGroup,
        "table-column" => Display::TableColumn,
        "table-cell" => Display::TableCell,
        "table-caption" => Display::TableCaption,
        _ => return None,
    })
}

fn parse_float(v: &str) -> Option<Float> {
    Some(match v {
        "none" => Float::None,
        "left" => Float::Left,
        "right" => Float::Right,
        _ => return None,
    })
}

fn parse_white_space(v: &str) -> Option<WhiteSpace> {
    Some(match v {
        "normal" => WhiteSpace::Normal,
        "nowrap" => WhiteSpace::Nowrap,
        "pre-line" => WhiteSpace::PreLine,
        "pre" => WhiteSpace::Pre,
        "pre-wrap" => WhiteSpace::PreWrap,
        "break-spaces" => WhiteSpace::BreakSpaces,
        _ => return None,
    })
}

fn parse_text_align(v: &str) -> Option<TextAlign> {
    Some(match v {
        "left" => TextAlign::Left,
        "center" => TextAlign::Center,
        "right" => TextAlign::Right,
        "justify" => TextAlign::Justify,
        "start" => TextAlign::Start,
        _ => return None,
    })
}

fn parse_vertical_align(v: &str) -> Option<VerticalAlign> {
    Some(match v {
        "baseline" => VerticalAlign::Baseline,
        "top" => VerticalAlign::Top,
        "middle" => VerticalAlign::Middle,
        "bottom" => VerticalAlign::Bottom,
        _ => return None,
    })
}

fn parse_length(input: &mut Parser<'_, '_>) -> Option<Length> {
    match input.next().ok()? {
        Token::Ident(v) if v.eq_ignore_ascii_case("auto") => Some(Length::Auto),
        Token::Dimension { value, unit, .. } if unit.eq_ignore_ascii_case("px") => {
            Some(Length::Px(*value as i32))
        }
        Token::Percentage { unit_value, .. } => Some(Length::Percent((unit_value * 10000.0) as i32)),
        Token::Number { value, .. } => Some(Length::Px(*value as i32)),
        _ => None,
    }
}
