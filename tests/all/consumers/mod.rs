mod middlewares;
