use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};

/// Trainable parameters owned by a single guide.
///
/// Every guide builds its own store, so starting a new fit never sees
/// parameters left over from a previous one.
pub struct ParamStore {
    varmap: VarMap,
    dtype: DType,
    device: Device,
}

impl ParamStore {
    pub fn new(dtype: DType, device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            dtype,
            device: device.clone(),
        }
    }

    /// Register a trainable parameter initialized to `init`.
    ///
    /// # Returns
    /// The tensor view of the parameter; optimizer updates are visible
    /// through it.
    pub fn param(&mut self, name: &str, init: &Tensor) -> Result<Tensor> {
        let vb = VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device);
        let param = vb.get_with_hints(init.dims().to_vec(), name, candle_nn::Init::Const(0.0))?;
        self.varmap.set_one(name, init.to_dtype(self.dtype)?)?;
        Ok(param)
    }

    /// Current value of a registered parameter, `None` if never registered.
    pub fn get(&self, name: &str) -> Result<Option<Tensor>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("parameter store lock: {}", e)))?;
        Ok(data.get(name).map(|var| var.as_tensor().clone()))
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn len(&self) -> usize {
        self.all_vars().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}
