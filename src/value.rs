//! Runtime values and the arithmetic the VM performs on them.
//!
//! Everything except heap objects is a plain `Copy` value. Operators check the
//! tags of their operands when they run, and any combination they don't list is
//! a [`ValueError`] rather than a fallback.

use std::f64::consts::PI;
use std::fmt::Display;
use std::ops::{Add, Sub};

use thiserror::Error;

use crate::heap::ObjRef;

/// A 2D vector in polar form. The Cartesian components are cached so the
/// component-wise operations don't pay for trig every time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    r: f64,
    t: f64,
    x: f64,
    y: f64,
}

impl Vector {
    /// A vector with magnitude `r` and angle `t` (radians).
    pub fn polar(r: f64, t: f64) -> Vector {
        Vector {
            r,
            t,
            x: r * t.cos(),
            y: r * t.sin(),
        }
    }

    /// A vector from its Cartesian components.
    pub fn cartesian(x: f64, y: f64) -> Vector {
        Vector {
            r: x.hypot(y),
            t: y.atan2(x),
            x,
            y,
        }
    }

    /// Magnitude.
    pub fn r(&self) -> f64 {
        self.r
    }

    /// Angle in radians.
    pub fn t(&self) -> f64 {
        self.t
    }

    /// Cached x component.
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Cached y component.
    pub fn y(&self) -> f64 {
        self.y
    }

    /// Replace the magnitude, keeping the angle.
    pub fn set_r(&mut self, r: f64) {
        *self = Vector::polar(r, self.t);
    }

    /// Replace the angle, keeping the magnitude.
    pub fn set_t(&mut self, t: f64) {
        *self = Vector::polar(self.r, t);
    }

    /// Same magnitude, pointing the other way.
    pub fn negated(self) -> Vector {
        Vector::polar(self.r, self.t + PI)
    }

    /// Magnitude multiplied by `factor`.
    pub fn scaled(self, factor: f64) -> Vector {
        Vector::polar(self.r * factor, self.t)
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, rhs: Vector) -> Vector {
        Vector::cartesian(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, rhs: Vector) -> Vector {
        Vector::cartesian(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A position in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    #[allow(missing_docs)]
    pub x: f64,
    #[allow(missing_docs)]
    pub y: f64,
}

impl Point {
    #[allow(missing_docs)]
    pub fn new(x: f64, y: f64) -> Point {
        Point { x, y }
    }
}

impl Add<Vector> for Point {
    type Output = Point;

    fn add(self, rhs: Vector) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub<Vector> for Point {
    type Output = Point;

    fn sub(self, rhs: Vector) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// The `.r`, `.t`, `.x` and `.y` members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    /// Magnitude of a vector.
    R,
    /// Angle of a vector.
    T,
    /// x of a point.
    X,
    /// y of a point.
    Y,
}

impl Member {
    /// Parse a member name as it appears after a dot.
    pub fn from_name(name: &str) -> Option<Member> {
        match name {
            "r" => Some(Member::R),
            "t" => Some(Member::T),
            "x" => Some(Member::X),
            "y" => Some(Member::Y),
            _ => None,
        }
    }

    /// The tag a value must carry to have this member.
    pub fn owner(&self) -> &'static str {
        match self {
            Member::R | Member::T => "vector",
            Member::X | Member::Y => "point",
        }
    }
}

impl Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Member::R => write!(f, "r"),
            Member::T => write!(f, "t"),
            Member::X => write!(f, "x"),
            Member::Y => write!(f, "y"),
        }
    }
}

/// Errors from applying an operator to values of the wrong shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// Binary operator applied to an unsupported pair of tags.
    #[error("Operator '{op}' can't be applied to {lhs} and {rhs}.")]
    BinaryMismatch {
        /// The operator's symbol.
        op: &'static str,
        /// Tag of the left operand.
        lhs: &'static str,
        /// Tag of the right operand.
        rhs: &'static str,
    },
    /// Unary operator applied to an unsupported tag.
    #[error("Operator '{op}' can't be applied to {operand}.")]
    UnaryMismatch {
        /// The operator's symbol.
        op: &'static str,
        /// Tag of the operand.
        operand: &'static str,
    },
    /// Member read or written on a value without that member.
    #[error("Member '{member}' needs a {}, got {got}.", .member.owner())]
    NoSuchMember {
        /// The member accessed.
        member: Member,
        /// Tag of the value accessed.
        got: &'static str,
    },
    /// Member assignment with a non-number.
    #[error("Member '{member}' can only be assigned a number, got {got}.")]
    MemberNotNumber {
        /// The member assigned.
        member: Member,
        /// Tag of the assigned value.
        got: &'static str,
    },
    #[error("Division by zero.")]
    #[allow(missing_docs)]
    DivisionByZero,
    /// Checked integer arithmetic overflowed.
    #[error("Integer overflow in '{0}'.")]
    IntegerOverflow(&'static str),
}

/// VM-internal representation of a script value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Absence of a value: missing initializers and bare returns.
    Nil,
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    Int(i64),
    #[allow(missing_docs)]
    Float(f64),
    #[allow(missing_docs)]
    Vector(Vector),
    #[allow(missing_docs)]
    Point(Point),
    /// Handle to an object owned by the VM's heap.
    Object(ObjRef),
}

impl Value {
    /// Name of the value's tag, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Vector(_) => "vector",
            Value::Point(_) => "point",
            Value::Object(_) => "object",
        }
    }

    /// The value as a float, if it is a number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// True for ints and floats.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// `+` for everything but strings, which need the heap.
    pub fn add(self, rhs: Value) -> Result<Value, ValueError> {
        match (self, rhs) {
            (Value::Vector(a), Value::Vector(b)) => Ok(Value::Vector(a + b)),
            (Value::Point(p), Value::Vector(v)) => Ok(Value::Point(p + v)),
            (a, b) => numeric("+", a, b, i64::checked_add, |x, y| x + y),
        }
    }

    #[allow(missing_docs)]
    pub fn subtract(self, rhs: Value) -> Result<Value, ValueError> {
        match (self, rhs) {
            (Value::Vector(a), Value::Vector(b)) => Ok(Value::Vector(a - b)),
            (Value::Point(p), Value::Vector(v)) => Ok(Value::Point(p - v)),
            (a, b) => numeric("-", a, b, i64::checked_sub, |x, y| x - y),
        }
    }

    #[allow(missing_docs)]
    pub fn multiply(self, rhs: Value) -> Result<Value, ValueError> {
        match (self, rhs.as_float()) {
            (Value::Vector(v), Some(factor)) => Ok(Value::Vector(v.scaled(factor))),
            _ => numeric("*", self, rhs, i64::checked_mul, |x, y| x * y),
        }
    }

    /// Integer division truncates; dividing an int or a vector by zero is an error,
    /// float division follows IEEE.
    pub fn divide(self, rhs: Value) -> Result<Value, ValueError> {
        match (self, rhs) {
            (Value::Vector(v), divisor) => match divisor.as_float() {
                Some(d) if d == 0.0 => Err(ValueError::DivisionByZero),
                Some(d) => Ok(Value::Vector(v.scaled(1.0 / d))),
                None => Err(mismatch("/", self, rhs)),
            },
            (Value::Int(_), Value::Int(0)) => Err(ValueError::DivisionByZero),
            (a, b) => numeric("/", a, b, i64::checked_div, |x, y| x / y),
        }
    }

    #[allow(missing_docs)]
    pub fn negate(self) -> Result<Value, ValueError> {
        match self {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or(ValueError::IntegerOverflow("-")),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Vector(v) => Ok(Value::Vector(v.negated())),
            other => Err(ValueError::UnaryMismatch {
                op: "-",
                operand: other.type_name(),
            }),
        }
    }

    #[allow(missing_docs)]
    pub fn not(self) -> Result<Value, ValueError> {
        match self {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ValueError::UnaryMismatch {
                op: "!",
                operand: other.type_name(),
            }),
        }
    }

    #[allow(missing_docs)]
    pub fn less(self, rhs: Value) -> Result<Value, ValueError> {
        compare("<", self, rhs, |a, b| a < b, |a, b| a < b)
    }

    #[allow(missing_docs)]
    pub fn greater(self, rhs: Value) -> Result<Value, ValueError> {
        compare(">", self, rhs, |a, b| a > b, |a, b| a > b)
    }

    /// Equality of everything but objects, whose contents live on the heap.
    /// Tags must match, so `1 == 1.0` is false.
    pub fn equals_plain(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // scripts are lax about NaNs and friends
            #[allow(clippy::float_cmp)]
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a.r == b.r && a.t == b.t,
            (Value::Point(a), Value::Point(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// Read `.r`, `.t`, `.x` or `.y`.
    pub fn member(&self, member: Member) -> Result<Value, ValueError> {
        let value = match (self, member) {
            (Value::Vector(v), Member::R) => v.r(),
            (Value::Vector(v), Member::T) => v.t(),
            (Value::Point(p), Member::X) => p.x,
            (Value::Point(p), Member::Y) => p.y,
            (other, member) => {
                return Err(ValueError::NoSuchMember {
                    member,
                    got: other.type_name(),
                })
            }
        };
        Ok(Value::Float(value))
    }

    /// Write `.r`, `.t`, `.x` or `.y` in place. Only numbers can be assigned, and
    /// they are stored as floats.
    pub fn set_member(&mut self, member: Member, assigned: Value) -> Result<f64, ValueError> {
        let number = assigned.as_float().ok_or(ValueError::MemberNotNumber {
            member,
            got: assigned.type_name(),
        })?;
        match (self, member) {
            (Value::Vector(v), Member::R) => v.set_r(number),
            (Value::Vector(v), Member::T) => v.set_t(number),
            (Value::Point(p), Member::X) => p.x = number,
            (Value::Point(p), Member::Y) => p.y = number,
            (other, member) => {
                return Err(ValueError::NoSuchMember {
                    member,
                    got: other.type_name(),
                })
            }
        }
        Ok(number)
    }
}

fn mismatch(op: &'static str, lhs: Value, rhs: Value) -> ValueError {
    ValueError::BinaryMismatch {
        op,
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

// Result is an int only when both operands are ints; anything else is widened to float.
fn numeric(
    op: &'static str,
    lhs: Value,
    rhs: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ValueError> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        return int_op(a, b)
            .map(Value::Int)
            .ok_or(ValueError::IntegerOverflow(op));
    }
    match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

fn compare(
    op: &'static str,
    lhs: Value,
    rhs: Value,
    int_cmp: fn(i64, i64) -> bool,
    float_cmp: fn(f64, f64) -> bool,
) -> Result<Value, ValueError> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        return Ok(Value::Bool(int_cmp(a, b)));
    }
    match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => Ok(Value::Bool(float_cmp(a, b))),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

/// Objects print as a bare handle here; `Heap::display` knows how to show their contents.
impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Vector(v) => write!(f, "<{}, {}>", v.r(), v.t()),
            Value::Point(p) => write!(f, "({}, {})", p.x, p.y),
            Value::Object(o) => write!(f, "<object {}>", o.index()),
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vector> for Value {
    fn from(v: Vector) -> Self {
        Value::Vector(v)
    }
}

impl From<Point> for Value {
    fn from(p: Point) -> Self {
        Value::Point(p)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn int_arithmetic_stays_int() {
        assert_eq!(Value::Int(2).add(Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(Value::Int(7).divide(Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(Value::Int(2).multiply(Value::Float(1.5)), Ok(Value::Float(3.0)));
        assert_eq!(Value::Float(0.5).subtract(Value::Int(1)), Ok(Value::Float(-0.5)));
    }

    #[test]
    fn checked_integer_errors() {
        assert_eq!(
            Value::Int(1).divide(Value::Int(0)),
            Err(ValueError::DivisionByZero)
        );
        assert_eq!(
            Value::Int(i64::MAX).add(Value::Int(1)),
            Err(ValueError::IntegerOverflow("+"))
        );
        // float division by zero is IEEE
        assert_eq!(
            Value::Int(1).divide(Value::Float(0.0)),
            Ok(Value::Float(f64::INFINITY))
        );
    }

    #[test]
    fn mismatched_tags_are_errors() {
        assert_eq!(
            Value::Bool(true).add(Value::Int(1)),
            Err(ValueError::BinaryMismatch {
                op: "+",
                lhs: "bool",
                rhs: "int"
            })
        );
        // scalar first is not supported
        let v = Value::Vector(Vector::polar(1.0, 0.0));
        assert!(Value::Int(2).multiply(v).is_err());
        // vector + point is not point + vector
        let p = Value::Point(Point::new(0.0, 0.0));
        assert!(v.add(p).is_err());
        assert!(Value::Nil.negate().is_err());
        assert!(Value::Int(1).not().is_err());
    }

    #[test]
    fn vector_negation_flips_angle() {
        let v = Vector::polar(2.0, 0.25);
        let Value::Vector(n) = Value::Vector(v).negate().unwrap() else {
            panic!("expected a vector");
        };
        assert!(close(n.r(), 2.0));
        assert!(close(n.t(), 0.25 + PI));
        assert!(close(n.x(), -v.x()));
        assert!(close(n.y(), -v.y()));
    }

    #[test]
    fn point_translation() {
        let p = Point::new(1.0, 1.0) + Vector::cartesian(2.0, -1.0);
        assert!(close(p.x, 3.0) && close(p.y, 0.0));
    }

    #[test]
    fn vector_scaling() {
        let v = Value::Vector(Vector::polar(2.0, 1.0));
        let Ok(Value::Vector(doubled)) = v.multiply(Value::Int(2)) else {
            panic!("expected a vector");
        };
        assert!(close(doubled.r(), 4.0));
        let Ok(Value::Vector(halved)) = v.divide(Value::Float(4.0)) else {
            panic!("expected a vector");
        };
        assert!(close(halved.r(), 0.5));
        assert_eq!(v.divide(Value::Int(0)), Err(ValueError::DivisionByZero));
    }

    #[test]
    fn members_read_and_write() {
        let mut v = Value::Vector(Vector::polar(1.0, 0.0));
        assert_eq!(v.member(Member::R), Ok(Value::Float(1.0)));
        assert_eq!(v.set_member(Member::R, Value::Int(3)), Ok(3.0));
        assert_eq!(v.member(Member::R), Ok(Value::Float(3.0)));
        assert!(matches!(
            v.member(Member::X),
            Err(ValueError::NoSuchMember { .. })
        ));

        let mut p = Value::Point(Point::new(0.0, 0.0));
        assert_eq!(p.set_member(Member::Y, Value::Float(2.5)), Ok(2.5));
        assert_eq!(p, Value::Point(Point::new(0.0, 2.5)));
        assert!(matches!(
            p.set_member(Member::X, Value::Bool(true)),
            Err(ValueError::MemberNotNumber { .. })
        ));
    }

    #[test]
    fn equality_requires_matching_tags() {
        assert!(Value::Int(1).equals_plain(&Value::Int(1)));
        assert!(!Value::Int(1).equals_plain(&Value::Float(1.0)));
        assert!(Value::Nil.equals_plain(&Value::Nil));
        assert!(!Value::Nil.equals_plain(&Value::Bool(false)));
    }
}
