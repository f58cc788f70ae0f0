use crashkit_types::{CrashId, DumpMap, RawCrash};

use crate::error::MoverResult;

/// Rewrites a raw crash on its way from the source to the destination.
pub trait Transform: Send + Sync {
    fn transform(
        &self,
        id: &CrashId,
        raw: RawCrash,
        dumps: DumpMap,
    ) -> MoverResult<(RawCrash, DumpMap)>;
}

/// Copies the crash unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn transform(
        &self,
        _id: &CrashId,
        raw: RawCrash,
        dumps: DumpMap,
    ) -> MoverResult<(RawCrash, DumpMap)> {
        Ok((raw, dumps))
    }
}

impl<F> Transform for F
where
    F: Fn(&CrashId, RawCrash, DumpMap) -> MoverResult<(RawCrash, DumpMap)> + Send + Sync,
{
    fn transform(
        &self,
        id: &CrashId,
        raw: RawCrash,
        dumps: DumpMap,
    ) -> MoverResult<(RawCrash, DumpMap)> {
        self(id, raw, dumps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoverError;
    use serde_json::json;

    #[test]
    fn identity_keeps_everything() {
        let id = CrashId::parse("abc123").unwrap();
        let raw = json!({"ProductName": "Firefox"}).as_object().cloned().unwrap();
        let dumps = DumpMap::single(b"MDMP".to_vec());
        let (out_raw, out_dumps) = IdentityTransform
            .transform(&id, raw.clone(), dumps.clone())
            .unwrap();
        assert_eq!(out_raw, raw);
        assert_eq!(out_dumps, dumps);
    }

    #[test]
    fn closures_are_transforms() {
        let tag = |_: &CrashId, mut raw: RawCrash, dumps: DumpMap| -> MoverResult<(RawCrash, DumpMap)> {
            raw.insert("moved".into(), true.into());
            Ok((raw, dumps))
        };
        let reject = |id: &CrashId, _: RawCrash, _: DumpMap| -> MoverResult<(RawCrash, DumpMap)> {
            Err(MoverError::Transform {
                id: id.clone(),
                reason: "no".into(),
            })
        };
        let id = CrashId::parse("abc123").unwrap();
        let (raw, _) = tag.transform(&id, RawCrash::new(), DumpMap::new()).unwrap();
        assert_eq!(raw.get("moved"), Some(&true.into()));
        assert!(reject.transform(&id, RawCrash::new(), DumpMap::new()).is_err());
    }
}
