//! Checking a host [`Shape`] against a foreign [`TypeDesc`].

use std::sync::Arc;

use super::shape::{Shape, Step};
use crate::layout::{Primitive, ScalarClass, TypeDesc, Version};

type Resolved = std::result::Result<Step, String>;

/// Resolve `shape` against `ty` in `version`, or explain the mismatch.
pub(crate) fn resolve(shape: &Shape, ty: &TypeDesc, version: &Version) -> Resolved {
    let abi = &version.abi;
    let size_of = |ty: &TypeDesc| version.size_of(ty);

    match (shape, ty) {
        (Shape::Scalar { size, class }, _) => resolve_scalar(*size, *class, ty, version),

        (Shape::Enum { name, size }, TypeDesc::Enum(foreign)) => {
            if foreign != name {
                return Err(format!("expected enumeration {}, found {}", name, foreign));
            }
            let width = size_of(ty)?;
            if width != *size {
                return Err(format!(
                    "enumeration {} is {} bytes, host expects {}",
                    name, width, size
                ));
            }
            Ok(Step::Enum { size: *size })
        }
        (Shape::Enum { size, .. }, TypeDesc::Primitive(p))
            if matches!(p.class(), Some(ScalarClass::Signed | ScalarClass::Unsigned)) =>
        {
            if p.size(abi) != *size {
                return Err(format!("{} is {} bytes, host expects {}", p, p.size(abi), size));
            }
            Ok(Step::Enum { size: *size })
        }

        (Shape::Bits { name, width }, TypeDesc::Bitfield(foreign)) => {
            if foreign != name {
                return Err(format!("expected bitfield {}, found {}", name, foreign));
            }
            let desc = version
                .bitfield(foreign)
                .ok_or_else(|| format!("unknown bitfield '{}'", foreign))?;
            if desc.size != *width {
                return Err(format!(
                    "bitfield {} covers {} bits, host mirror covers {}",
                    name,
                    desc.size * 8,
                    width * 8
                ));
            }
            Ok(Step::Bits { size: *width })
        }

        (Shape::Bytes { len }, _) => {
            let size = size_of(ty)?;
            if size != *len {
                return Err(format!("{} is {} bytes, host blob is {}", ty, size, len));
            }
            Ok(Step::Bytes { len: *len })
        }

        (Shape::Text, TypeDesc::Array { elem, len })
            if matches!(
                &**elem,
                TypeDesc::Primitive(Primitive::Char | Primitive::Int8 | Primitive::UInt8)
            ) =>
        {
            Ok(Step::Text { len: *len })
        }
        (Shape::Text, TypeDesc::Primitive(Primitive::StdString)) => Ok(Step::String {
            header: abi.string,
        }),

        (Shape::Array { elem, len }, TypeDesc::Array { elem: foreign, len: extent }) => {
            if len != extent {
                return Err(format!("array extent is {}, host expects {}", extent, len));
            }
            Ok(Step::Array {
                elem: Arc::new(resolve(elem, foreign, version).map_err(nested("element"))?),
                len: *len,
                stride: size_of(foreign)?,
            })
        }

        (Shape::Owned(host), TypeDesc::Pointer(inner)) => {
            pointee(version, inner, host.record)?;
            Ok(Step::Owned {
                host: *host,
                link: 0,
            })
        }

        (Shape::Shared(host), TypeDesc::Shared(inner)) => {
            pointee(version, inner, host.record)?;
            Ok(Step::Shared {
                host: *host,
                link: abi.shared.object,
            })
        }
        (Shape::Shared(host), TypeDesc::Pointer(inner)) => {
            pointee(version, inner, host.record)?;
            Ok(Step::Shared {
                host: *host,
                link: 0,
            })
        }

        (Shape::SharedHere(host), TypeDesc::Record(name)) => {
            record_view(version, name, host.record)?;
            Ok(Step::SharedHere { host: *host })
        }

        (Shape::Back { record }, TypeDesc::Pointer(inner) | TypeDesc::Weak(inner)) => {
            back_target(version, inner, record)?;
            Ok(Step::Back { link: 0 })
        }
        (Shape::Back { record }, TypeDesc::Shared(inner)) => {
            back_target(version, inner, record)?;
            Ok(Step::Back {
                link: abi.shared.object,
            })
        }

        (Shape::Record(host), TypeDesc::Record(name)) => {
            record_view(version, name, host.record)?;
            Ok(Step::Record { host: *host })
        }

        (Shape::Seq(elem), TypeDesc::Vector(foreign)) => Ok(Step::Seq {
            elem: Arc::new(resolve(elem, foreign, version).map_err(nested("element"))?),
            header: abi.vector,
            stride: size_of(foreign)?,
        }),
        (Shape::Seq(elem), TypeDesc::Array { elem: foreign, len }) => Ok(Step::Array {
            elem: Arc::new(resolve(elem, foreign, version).map_err(nested("element"))?),
            len: *len,
            stride: size_of(foreign)?,
        }),

        (
            Shape::Map { key, value },
            TypeDesc::Map {
                key: foreign_key,
                value: foreign_value,
            },
        ) => {
            let (value_offset, stride) = version.map_entry(foreign_key, foreign_value)?;
            Ok(Step::Map {
                key: Arc::new(resolve(key, foreign_key, version).map_err(nested("key"))?),
                value: Arc::new(resolve(value, foreign_value, version).map_err(nested("value"))?),
                header: abi.map,
                value_offset,
                stride,
            })
        }

        (Shape::Poly(poly), TypeDesc::Pointer(inner)) => {
            poly_target(version, inner, poly.base)?;
            Ok(Step::Poly {
                poly: *poly,
                link: 0,
            })
        }
        (Shape::SharedPoly(poly), TypeDesc::Shared(inner)) => {
            poly_target(version, inner, poly.base)?;
            Ok(Step::SharedPoly {
                poly: *poly,
                link: abi.shared.object,
            })
        }
        (Shape::SharedPoly(poly), TypeDesc::Pointer(inner)) => {
            poly_target(version, inner, poly.base)?;
            Ok(Step::SharedPoly {
                poly: *poly,
                link: 0,
            })
        }

        (Shape::Flags { count }, TypeDesc::Flags) => Ok(Step::Flags {
            header: abi.flags,
            count: *count,
        }),

        (shape, ty) => Err(format!(
            "host expects {}, layout has {} '{}'",
            shape.describe(),
            ty.kind_name(),
            ty
        )),
    }
}

fn resolve_scalar(size: usize, class: ScalarClass, ty: &TypeDesc, version: &Version) -> Resolved {
    let (foreign_size, foreign_class) = match ty {
        TypeDesc::Primitive(p) => match p.class() {
            Some(c) => (p.size(&version.abi), c),
            None => return Err(format!("{} is not a scalar", p)),
        },
        TypeDesc::Enum(_) | TypeDesc::Bitfield(_) => (version.size_of(ty)?, ScalarClass::Unsigned),
        other => {
            return Err(format!(
                "host expects a scalar, layout has {} '{}'",
                other.kind_name(),
                other
            ));
        }
    };
    if foreign_size != size {
        return Err(format!(
            "{} is {} bytes, host field is {}",
            ty, foreign_size, size
        ));
    }
    let integer = |c: ScalarClass| matches!(c, ScalarClass::Signed | ScalarClass::Unsigned);
    let compatible = match (class, foreign_class) {
        (a, b) if integer(a) && integer(b) => true,
        (ScalarClass::Float, ScalarClass::Float) => true,
        (ScalarClass::Bool, ScalarClass::Bool) => true,
        (ScalarClass::Bool, c) | (c, ScalarClass::Bool) => integer(c) && size == 1,
        _ => false,
    };
    if !compatible {
        return Err(format!(
            "{:?} host field cannot mirror {:?} '{}'",
            class, foreign_class, ty
        ));
    }
    Ok(Step::Scalar { size })
}

/// Pointee of an owning/shared pointer must be the host record or derive
/// from it.
fn pointee(version: &Version, inner: &TypeDesc, record: &str) -> std::result::Result<(), String> {
    match inner {
        TypeDesc::Record(name) => record_view(version, name, record),
        other => Err(format!("pointer to {} cannot hold record {}", other, record)),
    }
}

fn poly_target(version: &Version, inner: &TypeDesc, base: &str) -> std::result::Result<(), String> {
    let name = match inner {
        TypeDesc::Record(name) => name,
        other => return Err(format!("{} is not a record", other)),
    };
    if !version.is_derived_from(name, base) && !version.is_derived_from(base, name) {
        return Err(format!("{} is unrelated to polymorphic base {}", name, base));
    }
    Ok(())
}

fn record_view(version: &Version, name: &str, record: &str) -> std::result::Result<(), String> {
    if version.record(record).is_none() {
        return Err(format!("unknown record '{}'", record));
    }
    if !version.is_derived_from(name, record) {
        return Err(format!("{} is not {} or derived from it", name, record));
    }
    Ok(())
}

/// Back references may point either way along the hierarchy; the target
/// is never read.
fn back_target(version: &Version, inner: &TypeDesc, record: &str) -> std::result::Result<(), String> {
    match inner {
        TypeDesc::Record(name)
            if version.is_derived_from(name, record) || version.is_derived_from(record, name) =>
        {
            Ok(())
        }
        other => Err(format!("pointer to {} is not a reference to {}", other, record)),
    }
}

fn nested(what: &'static str) -> impl Fn(String) -> String {
    move |reason| format!("{}: {}", what, reason)
}
