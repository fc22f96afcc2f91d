//! AQL lexer and parser tests
//!
//! Covers token streams, query structure, malformed input, parameter
//! binding and the parse/display round-trip.

use apogy_aql::{parse, tokenize, Condition, ParseError, Predicate, Query, Token, TokenType};
use apogy_core::Value;
use proptest::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

fn tok(kind: TokenType, literal: &str) -> Token {
    Token::new(kind, literal)
}

fn eq(key: &str, value: impl Into<Value>) -> Condition {
    Condition::new(key, Predicate::Equal(value.into()))
}

fn present(key: &str) -> Condition {
    Condition::new(key, Predicate::Present)
}

// ============================================================================
// SECTION 1: Lexer
// ============================================================================

mod lexer {
    use super::*;
    use TokenType::*;

    #[test]
    fn test_single_identifier() {
        assert_eq!(tokenize("Book"), vec![tok(Ident, "Book"), tok(Eof, "")]);
    }

    #[test]
    fn test_filter_tokens() {
        assert_eq!(
            tokenize("Book(key=val)"),
            vec![
                tok(Ident, "Book"),
                tok(LParen, "("),
                tok(Ident, "key"),
                tok(Equals, "="),
                tok(Ident, "val"),
                tok(RParen, ")"),
                tok(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_nested_tokens() {
        assert_eq!(
            tokenize("Book { Author }"),
            vec![
                tok(Ident, "Book"),
                tok(LBrace, "{"),
                tok(Ident, "Author"),
                tok(RBrace, "}"),
                tok(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_deep_nesting_with_empty_separators() {
        assert_eq!(
            tokenize("Book(id=123) { author(active=true,,) { name } }"),
            vec![
                tok(Ident, "Book"),
                tok(LParen, "("),
                tok(Ident, "id"),
                tok(Equals, "="),
                tok(Ident, "123"),
                tok(RParen, ")"),
                tok(LBrace, "{"),
                tok(Ident, "author"),
                tok(LParen, "("),
                tok(Ident, "active"),
                tok(Equals, "="),
                tok(Ident, "true"),
                tok(Comma, ","),
                tok(Comma, ","),
                tok(RParen, ")"),
                tok(LBrace, "{"),
                tok(Ident, "name"),
                tok(RBrace, "}"),
                tok(RBrace, "}"),
                tok(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_dotted_model_name() {
        let toks = tokenize("com.bob.Book { Author(active=true) { Name } }");
        assert_eq!(toks[0], tok(Ident, "com.bob.Book"));
        assert_eq!(toks.len(), 13);
    }

    #[test]
    fn test_parameter_placeholder() {
        assert_eq!(
            tokenize("Book(id=?)"),
            vec![
                tok(Ident, "Book"),
                tok(LParen, "("),
                tok(Ident, "id"),
                tok(Equals, "="),
                tok(Param, "?"),
                tok(RParen, ")"),
                tok(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_operators() {
        let kinds: Vec<TokenType> = tokenize("< > ^ $ , & &&").into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![Less, Greater, Prefix, Skip, Comma, And, And, Eof]);
    }
}

// ============================================================================
// SECTION 2: Parser
// ============================================================================

mod parser {
    use super::*;

    #[test]
    fn test_bare_model() {
        assert_eq!(parse("com.Book", &[]).unwrap(), Query::new("com.Book"));
    }

    #[test]
    fn test_presence_filters() {
        let q = parse("Book(val)", &[]).unwrap();
        assert_eq!(q.filter, vec![present("val")]);

        let q = parse("Book(val val.a)", &[]).unwrap();
        assert_eq!(q.filter, vec![present("val"), present("val.a")]);
    }

    #[test]
    fn test_links() {
        let q = parse("Book { Author }", &[]).unwrap();
        assert_eq!(q, Query::new("Book").with_link(Query::new("Author")));
    }

    #[test]
    fn test_filter_and_links() {
        let q = parse("Book(id=123) { Author }", &[]).unwrap();
        assert_eq!(q.filter, vec![eq("id", Value::Float(123.0))]);
        assert_eq!(q.links, vec![Query::new("Author")]);
    }

    #[test]
    fn test_nested_filters() {
        let q = parse("com.bob.Book { Author(active=true) { Name } }", &[]).unwrap();
        let expected = Query::new("com.bob.Book").with_link(
            Query::new("Author")
                .with_condition("active", Predicate::Equal(Value::Bool(true)))
                .with_link(Query::new("Name")),
        );
        assert_eq!(q, expected);
    }

    #[test]
    fn test_mixed_values_and_separators() {
        let q = parse(r#"Book(name="test" count=42 ,,,, enabled=true)"#, &[]).unwrap();
        assert_eq!(
            q.filter,
            vec![
                eq("name", "test"),
                eq("count", Value::Float(42.0)),
                eq("enabled", true),
            ]
        );
    }

    #[test]
    fn test_and_separators() {
        let q = parse("Book(a=1 & b=2 && c=3)", &[]).unwrap();
        assert_eq!(q.filter.len(), 3);
    }

    #[test]
    fn test_range_and_prefix_operators() {
        let q = parse(r#"Book(year<2000 rating>3 title^"Du"$"Dun")"#, &[]).unwrap();
        assert_eq!(
            q.filter,
            vec![
                Condition::new("year", Predicate::Less(Value::Float(2000.0))),
                Condition::new("rating", Predicate::Greater(Value::Float(3.0))),
                Condition::new(
                    "title",
                    Predicate::Prefix {
                        value: Value::from("Du"),
                        skip: Some(Value::from("Dun")),
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_quoted_numbers_stay_strings() {
        let q = parse(r#"Book(isbn="123")"#, &[]).unwrap();
        assert_eq!(q.filter, vec![eq("isbn", "123")]);
    }
}

// ============================================================================
// SECTION 3: Malformed Input
// ============================================================================

mod malformed {
    use super::*;

    #[test]
    fn test_rejected_inputs() {
        let cases = [
            "",
            "Book {",
            "Book(key=val",
            "Book { Author",
            "Book(key==val)",
            r#"Book(key="val)"#,
            "Book(invalid=json{)",
            "Book(name=?)",
            "(a=1)",
        ];
        for input in cases {
            assert!(parse(input, &[]).is_err(), "expected error for {:?}", input);
        }
    }

    #[test]
    fn test_accepted_inputs() {
        let cases = [
            "Book { Author { } }",
            "Book.SubType { Author }",
            "Book-Type { Author }",
            "Book()",
        ];
        for input in cases {
            assert!(parse(input, &[]).is_ok(), "unexpected error for {:?}", input);
        }
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            parse("", &[]).unwrap_err().to_string(),
            "expected identifier, got EOF"
        );
        assert_eq!(
            parse("Book(key==val)", &[]).unwrap_err(),
            ParseError::ExpectedValue(TokenType::Equals)
        );
        assert_eq!(parse("Book {", &[]).unwrap_err(), ParseError::UnclosedNested);
    }
}

// ============================================================================
// SECTION 4: Parameters
// ============================================================================

mod parameters {
    use super::*;

    #[test]
    fn test_missing_parameter_errors() {
        let err = parse("Book(name=?)", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "query contains 1 parameter placeholders but only 0 values were provided"
        );
    }

    #[test]
    fn test_single_string_parameter() {
        let q = parse("Book(name=?)", &[Value::from("x")]).unwrap();
        assert_eq!(q.filter[0].predicate, Predicate::Equal(Value::from("x")));
    }

    #[test]
    fn test_parameters_of_different_types() {
        let q = parse(
            "Book(name=? count=? available=?)",
            &[
                Value::from("Game of Thrones"),
                Value::Float(42.0),
                Value::Bool(true),
            ],
        )
        .unwrap();
        assert_eq!(
            q.filter,
            vec![
                eq("name", "Game of Thrones"),
                eq("count", Value::Float(42.0)),
                eq("available", true),
            ]
        );
    }

    #[test]
    fn test_parameters_with_every_operator() {
        let q = parse(
            "Book(title=? price<? popularity>? prefix^?)",
            &[
                Value::from("The Hobbit"),
                Value::Float(20.0),
                Value::Float(4.0),
                Value::from("Lord"),
            ],
        )
        .unwrap();
        assert_eq!(q.filter[1].predicate, Predicate::Less(Value::Float(20.0)));
        assert_eq!(q.filter[2].predicate, Predicate::Greater(Value::Float(4.0)));
        assert_eq!(
            q.filter[3].predicate,
            Predicate::Prefix {
                value: Value::from("Lord"),
                skip: None
            }
        );
    }

    #[test]
    fn test_parameters_in_nested_queries() {
        let q = parse(
            "Book(id=?) { Author(age>?) }",
            &[Value::Float(123.0), Value::Float(30.0)],
        )
        .unwrap();
        assert_eq!(q.filter, vec![eq("id", Value::Float(123.0))]);
        assert_eq!(
            q.links[0].filter[0].predicate,
            Predicate::Greater(Value::Float(30.0))
        );
    }

    #[test]
    fn test_not_enough_parameters() {
        let err = parse("Book(id=? title=?)", &[Value::Float(123.0)]).unwrap_err();
        assert_eq!(
            err,
            ParseError::NotEnoughParameters {
                expected: 2,
                provided: 1
            }
        );
    }

    #[test]
    fn test_extra_parameters_ignored() {
        let q = parse(
            "Book(id=?)",
            &[Value::Float(123.0), Value::from("extra"), Value::from("params")],
        )
        .unwrap();
        assert_eq!(q.filter, vec![eq("id", Value::Float(123.0))]);
    }

    #[test]
    fn test_parameter_as_skip_value() {
        let q = parse("Book(t^?$?)", &[Value::from("a"), Value::from("ab")]).unwrap();
        assert_eq!(
            q.filter[0].predicate,
            Predicate::Prefix {
                value: Value::from("a"),
                skip: Some(Value::from("ab"))
            }
        );
    }
}

// ============================================================================
// SECTION 5: Round-trip
// ============================================================================

mod round_trip {
    use super::*;

    fn ident() -> impl Strategy<Value = String> + Clone {
        "[A-Za-z_][A-Za-z0-9_.-]{0,8}"
    }

    fn literal() -> impl Strategy<Value = Value> + Clone {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::Float),
            "[A-Za-z0-9 ._,(){}<>^$?&=-]{0,12}".prop_map(Value::String),
        ]
    }

    fn predicate() -> impl Strategy<Value = Predicate> + Clone {
        prop_oneof![
            Just(Predicate::Present),
            literal().prop_map(Predicate::Equal),
            literal().prop_map(Predicate::Less),
            literal().prop_map(Predicate::Greater),
            (literal(), proptest::option::of(literal()))
                .prop_map(|(value, skip)| Predicate::Prefix { value, skip }),
        ]
    }

    fn query() -> impl Strategy<Value = Query> {
        let condition = (ident(), predicate()).prop_map(|(k, p)| Condition::new(k, p));
        let leaf = (ident(), proptest::collection::vec(condition.clone(), 0..4)).prop_map(
            |(model, filter)| Query {
                model,
                filter,
                links: Vec::new(),
            },
        );
        leaf.prop_recursive(2, 8, 3, move |inner| {
            (
                ident(),
                proptest::collection::vec(condition.clone(), 0..3),
                proptest::collection::vec(inner, 0..3),
            )
                .prop_map(|(model, filter, links)| Query {
                    model,
                    filter,
                    links,
                })
        })
    }

    #[test]
    fn test_display_reparses_to_same_query() {
        let input = r#"Book(a="x y" b>-1.5 c^"p"$"pq" d) { Author(e=true) { Name } Tag }"#;
        let q = parse(input, &[]).unwrap();
        assert_eq!(parse(&q.to_string(), &[]).unwrap(), q);
    }

    proptest! {
        #[test]
        fn display_round_trips(q in query()) {
            let text = q.to_string();
            let reparsed = parse(&text, &[]);
            prop_assert_eq!(reparsed, Ok(q), "text: {}", text);
        }
    }
}
