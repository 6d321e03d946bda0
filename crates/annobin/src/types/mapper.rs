//! Name-based correspondence between a source and a target type system.
//!
//! Types correspond when their names match; features correspond when their
//! names match within corresponding types. A source type with no target
//! counterpart is excluded from serialization entirely; a feature is
//! resolved per direction (a hole is an error when encoding, a skip when
//! decoding; see the codec).

use crate::error::SchemaError;
use crate::types::{TypeCode, TypeSystem};

/// Feature-level resolution for one source type: for each target feature,
/// the corresponding source feature index, if any.
type FeatureMap = Box<[Option<u16>]>;

/// Mapper between two committed type systems.
#[derive(Debug)]
pub struct TypeMapper {
    /// Source code -> target code (0 = excluded).
    src_to_tgt: Box<[TypeCode]>,
    /// Target code -> source code (0 = excluded).
    tgt_to_src: Box<[TypeCode]>,
    /// Indexed by source code: target-ordered feature resolution.
    tgt_feats_in_src: Box<[FeatureMap]>,
}

impl TypeMapper {
    /// Builds the mapper. Fails if a name-matched feature has different
    /// ranges on the two sides.
    pub(crate) fn build(src: &TypeSystem, tgt: &TypeSystem) -> Result<TypeMapper, SchemaError> {
        let mut src_to_tgt = vec![0 as TypeCode; src.num_codes()];
        let mut tgt_to_src = vec![0 as TypeCode; tgt.num_codes()];
        let mut tgt_feats_in_src: Vec<FeatureMap> = vec![Box::new([]); src.num_codes()];

        for s in 1..src.num_codes() as TypeCode {
            let name = src.name_of(s);
            let Some(t) = tgt.code_of(name) else { continue };
            src_to_tgt[s as usize] = t;
            tgt_to_src[t as usize] = s;

            let mut feats = Vec::with_capacity(tgt.features(t).len());
            for tf in tgt.features(t) {
                match src.feature_index(s, &tf.name) {
                    Some(si) => {
                        let sr = src.features(s)[si as usize].range;
                        if sr != tf.range {
                            return Err(SchemaError::RangeMismatch {
                                type_name: name.to_string(),
                                feature: tf.name.clone(),
                                expected: tf.range.name(),
                                found: sr.name(),
                            });
                        }
                        feats.push(Some(si));
                    }
                    None => feats.push(None),
                }
            }
            tgt_feats_in_src[s as usize] = feats.into_boxed_slice();
        }

        Ok(TypeMapper {
            src_to_tgt: src_to_tgt.into_boxed_slice(),
            tgt_to_src: tgt_to_src.into_boxed_slice(),
            tgt_feats_in_src: tgt_feats_in_src.into_boxed_slice(),
        })
    }

    /// Maps a source type code to its target counterpart (0 = excluded).
    #[inline]
    pub fn map_src_to_tgt(&self, code: TypeCode) -> TypeCode {
        self.src_to_tgt.get(code as usize).copied().unwrap_or(0)
    }

    /// Maps a target type code back to its source counterpart (0 = excluded).
    #[inline]
    pub fn map_tgt_to_src(&self, code: TypeCode) -> TypeCode {
        self.tgt_to_src.get(code as usize).copied().unwrap_or(0)
    }

    /// For an included source type: the source feature index corresponding
    /// to each target feature, in target feature order.
    #[inline]
    pub fn tgt_feats_in_src(&self, src_code: TypeCode) -> &[Option<u16>] {
        &self.tgt_feats_in_src[src_code as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Range, TYPE_TOP, TypeSystemBuilder};

    #[test]
    fn test_narrowing_excludes_types_and_features() {
        let mut b = TypeSystemBuilder::new();
        let a = b.add_type("A", TYPE_TOP).unwrap();
        b.add_feature(a, "x", Range::Int).unwrap();
        b.add_feature(a, "y", Range::String).unwrap();
        let extra = b.add_type("OnlyInSrc", TYPE_TOP).unwrap();
        let src = b.commit().unwrap();

        let mut b = TypeSystemBuilder::new();
        let a2 = b.add_type("A", TYPE_TOP).unwrap();
        b.add_feature(a2, "x", Range::Int).unwrap();
        let tgt = b.commit().unwrap();

        let m = TypeMapper::build(&src, &tgt).unwrap();
        assert_eq!(m.map_src_to_tgt(a), a2);
        assert_eq!(m.map_src_to_tgt(extra), 0);
        assert_eq!(m.map_tgt_to_src(a2), a);
        // target order: only "x", resolved to source index 0
        assert_eq!(m.tgt_feats_in_src(a), &[Some(0)]);
    }

    #[test]
    fn test_target_superset_feature_is_a_hole() {
        let mut b = TypeSystemBuilder::new();
        let a = b.add_type("A", TYPE_TOP).unwrap();
        b.add_feature(a, "x", Range::Int).unwrap();
        let src = b.commit().unwrap();

        let mut b = TypeSystemBuilder::new();
        let a2 = b.add_type("A", TYPE_TOP).unwrap();
        b.add_feature(a2, "x", Range::Int).unwrap();
        b.add_feature(a2, "extra", Range::Int).unwrap();
        let tgt = b.commit().unwrap();
        let _ = a2;

        let m = TypeMapper::build(&src, &tgt).unwrap();
        assert_eq!(m.tgt_feats_in_src(a), &[Some(0), None]);
    }

    #[test]
    fn test_range_mismatch_rejected() {
        let mut b = TypeSystemBuilder::new();
        let a = b.add_type("A", TYPE_TOP).unwrap();
        b.add_feature(a, "x", Range::Int).unwrap();
        let src = b.commit().unwrap();

        let mut b = TypeSystemBuilder::new();
        let a2 = b.add_type("A", TYPE_TOP).unwrap();
        b.add_feature(a2, "x", Range::String).unwrap();
        let tgt = b.commit().unwrap();
        let _ = a2;

        assert!(matches!(
            TypeMapper::build(&src, &tgt),
            Err(SchemaError::RangeMismatch { .. })
        ));
    }

    #[test]
    fn test_builtins_always_map() {
        let src = TypeSystemBuilder::new().commit().unwrap();
        let tgt = TypeSystemBuilder::new().commit().unwrap();
        let m = TypeMapper::build(&src, &tgt).unwrap();
        for code in 1..src.num_codes() as TypeCode {
            assert_eq!(m.map_src_to_tgt(code), code);
        }
    }
}
