use {
    alloy_dyn_abi::{DynSolType, DynSolValue},
    alloy_primitives::keccak256,
    anyhow::{Context, Result},
};

/// A single contract method invocation: human-readable signature, encoded
/// arguments and the declared return shape.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub signature: &'static str,
    pub args: Vec<DynSolValue>,
    pub returns: Vec<DynSolType>,
}

impl MethodCall {
    pub fn new(
        signature: &'static str,
        args: Vec<DynSolValue>,
        returns: Vec<DynSolType>,
    ) -> Self {
        Self {
            signature,
            args,
            returns,
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// ABI-encodes the full calldata, selector included.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = self.selector().to_vec();
        if !self.args.is_empty() {
            data.extend(DynSolValue::Tuple(self.args.clone()).abi_encode_params());
        }
        data
    }

    /// Decodes return data. A single declared return decodes to the value
    /// itself, multiple returns decode to a tuple.
    pub fn decode_returns(&self, data: &[u8]) -> Result<DynSolValue> {
        match self.returns.as_slice() {
            [] => Ok(DynSolValue::Tuple(Vec::new())),
            [single] => single
                .abi_decode(data)
                .with_context(|| format!("return data of {}", self.signature)),
            many => DynSolType::Tuple(many.to_vec())
                .abi_decode_params(data)
                .with_context(|| format!("return data of {}", self.signature)),
        }
    }
}

/// A named method within a [`CallTemplate`].
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateField {
    pub name: &'static str,
    pub method: MethodCall,
}

/// An ordered set of named methods all issued against the same contract.
#[derive(Clone, Debug, PartialEq)]
pub struct CallTemplate {
    pub fields: Vec<TemplateField>,
}

impl CallTemplate {
    pub fn field(&self, name: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

pub fn field(name: &'static str, method: MethodCall) -> TemplateField {
    TemplateField { name, method }
}
